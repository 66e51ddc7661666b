//! Disk-backed cache window for byte sources.
//!
//! In cached mode the in-memory buffer is a fixed-size window into a
//! backing file: a fresh temporary file for downloads, or the source
//! file itself for local playback (avoiding a redundant copy, and never
//! deleted on close).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Size of the in-memory window over the backing file.
pub const CACHE_WINDOW_SIZE: usize = 8192;

enum Backing {
    /// Deleted automatically when the cache is dropped.
    Temp(NamedTempFile),
    /// A caller-owned file reused in place; kept on close.
    Local(File),
}

impl Backing {
    fn file(&mut self) -> &mut File {
        match self {
            Backing::Temp(t) => t.as_file_mut(),
            Backing::Local(f) => f,
        }
    }
}

/// Sliding window over a disk file holding the downloaded bytes.
pub struct DiskCache {
    backing: Backing,
    window: Vec<u8>,
    /// Offset of `window[0]` in the backing file.
    window_pos: u64,
}

impl DiskCache {
    /// Create a cache backed by a new temporary file.
    pub fn temp() -> io::Result<Self> {
        let backing = Backing::Temp(NamedTempFile::new()?);
        Ok(Self {
            backing,
            window: Vec::with_capacity(CACHE_WINDOW_SIZE),
            window_pos: 0,
        })
    }

    /// Reuse an existing local file as the cache. Returns the cache and
    /// the file's length; the file is never deleted.
    pub fn local<P: AsRef<Path>>(path: P) -> io::Result<(Self, u64)> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let cache = Self {
            backing: Backing::Local(file),
            window: Vec::with_capacity(CACHE_WINDOW_SIZE),
            window_pos: 0,
        };
        Ok((cache, len))
    }

    /// Append bytes at `offset` (the producer's write cursor).
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let file = self.backing.file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        // Newly written bytes may overlap the resident window; drop it so
        // the next read re-fetches current contents.
        if offset < self.window_pos + self.window.len() as u64 {
            self.window.clear();
        }
        Ok(())
    }

    /// Copy bytes starting at `pos` into `out`, re-reading the window
    /// from disk when `pos` falls outside it. `received` bounds how far
    /// the file has valid data.
    pub fn read_at(&mut self, pos: u64, received: u64, out: &mut [u8]) -> io::Result<usize> {
        debug_assert!(pos < received);
        if pos < self.window_pos || pos >= self.window_pos + self.window.len() as u64 {
            self.refill(pos, received)?;
        }
        let start = (pos - self.window_pos) as usize;
        let n = out.len().min(self.window.len() - start);
        out[..n].copy_from_slice(&self.window[start..start + n]);
        Ok(n)
    }

    fn refill(&mut self, pos: u64, received: u64) -> io::Result<()> {
        let len = CACHE_WINDOW_SIZE.min((received - pos) as usize);
        self.window.resize(len, 0);
        let file = self.backing.file();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut self.window)?;
        self.window_pos = pos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_write_then_read_back() {
        let mut cache = DiskCache::temp().unwrap();
        cache.write_at(0, b"hello world").unwrap();

        let mut buf = [0u8; 5];
        let n = cache.read_at(0, 11, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        let n = cache.read_at(6, 11, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn test_window_refetch_on_seek_back() {
        let mut cache = DiskCache::temp().unwrap();
        let data: Vec<u8> = (0..255u8).cycle().take(CACHE_WINDOW_SIZE * 3).collect();
        cache.write_at(0, &data).unwrap();
        let total = data.len() as u64;

        // Read far ahead, then jump back before the window start.
        let mut buf = [0u8; 16];
        let far = (CACHE_WINDOW_SIZE * 2) as u64;
        cache.read_at(far, total, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[far as usize..far as usize + 16]);

        cache.read_at(3, total, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[3..19]);
    }

    #[test]
    fn test_local_file_reused_and_kept() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"local bytes").unwrap();
        tmp.flush().unwrap();
        let path = tmp.path().to_path_buf();

        {
            let (mut cache, len) = DiskCache::local(&path).unwrap();
            assert_eq!(len, 11);
            let mut buf = [0u8; 11];
            let n = cache.read_at(0, len, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"local bytes");
        }
        // Dropping the cache must not delete a local file.
        assert!(path.exists());
    }
}
