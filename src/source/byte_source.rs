//! Shared byte source between one producer and one consumer thread.
//!
//! The producer (a download job or file reader) pushes bytes in with
//! [`ByteSource::append`]; the consumer pulls them out through a
//! [`SourceReader`], blocking while data is still on its way. `stop`
//! unblocks a stuck reader immediately, which is how the demux loop is
//! cancelled mid-read.

use crate::source::cache::DiskCache;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Minimum growth increment when an append overflows the buffer, so
/// slow trickle appends do not reallocate byte-by-byte.
pub const BUFFER_MIN_GROWTH: usize = 4096;

/// Hard cap on in-memory buffering when no content length was declared.
pub const MAX_BUFFER_SIZE: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Content exceeds the declared length and growth is disabled.
    #[error("content exceeds the declared length of the source")]
    TooLarge,
    /// Growth is allowed but the unsized-buffer hard cap was reached.
    #[error("source buffer reached its capacity limit")]
    CapacityExceeded,
    #[error("position {0} has not been received yet")]
    NotYetAvailable(u64),
    #[error("disk cache i/o: {0}")]
    Io(#[from] io::Error),
    #[error("source was stopped")]
    Aborted,
}

enum Storage {
    Memory(Vec<u8>),
    Disk(DiskCache),
}

struct Inner {
    storage: Storage,
    /// Expected total length; `None` until a content length is known.
    total_len: Option<u64>,
    received: u64,
    failed: bool,
    finished: bool,
    allow_growth: bool,
}

/// A byte stream written by a producer while being read by a consumer.
pub struct ByteSource {
    inner: Mutex<Inner>,
    data_available: Condvar,
}

impl ByteSource {
    /// In-memory source; the buffer grows as data arrives.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                storage: Storage::Memory(Vec::new()),
                total_len: None,
                received: 0,
                failed: false,
                finished: false,
                allow_growth: true,
            }),
            data_available: Condvar::new(),
        })
    }

    /// Source holding its bytes in a temporary disk file, keeping only a
    /// fixed window resident.
    pub fn with_disk_cache() -> Result<Arc<Self>, SourceError> {
        let cache = DiskCache::temp()?;
        debug!("byte source downloading to disk cache");
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                storage: Storage::Disk(cache),
                total_len: None,
                received: 0,
                failed: false,
                finished: false,
                allow_growth: true,
            }),
            data_available: Condvar::new(),
        }))
    }

    /// Source over an existing local file, reusing the file itself as
    /// the cache. The source starts fully received and finished.
    pub fn from_local_file<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, SourceError> {
        let (cache, len) = DiskCache::local(path)?;
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                storage: Storage::Disk(cache),
                total_len: Some(len),
                received: len,
                failed: false,
                finished: true,
                allow_growth: false,
            }),
            data_available: Condvar::new(),
        }))
    }

    /// Declare the expected total length, allocating backing storage.
    /// May be called again to accommodate a growing download.
    pub fn set_length(&self, len: u64) {
        let mut inner = self.inner.lock();
        inner.total_len = Some(len);
        if let Storage::Memory(buf) = &mut inner.storage {
            if buf.len() < len as usize {
                buf.resize(len as usize, 0);
            }
        }
    }

    /// Disallow (or re-allow) growing past the declared length.
    pub fn set_allow_growth(&self, allow: bool) {
        self.inner.lock().allow_growth = allow;
    }

    /// Append bytes from the producer and wake any blocked reader.
    pub fn append(&self, data: &[u8]) -> Result<(), SourceError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.failed {
            return Err(SourceError::Aborted);
        }

        let end = inner.received + data.len() as u64;
        if let Some(total) = inner.total_len {
            if end > total {
                if !inner.allow_growth {
                    return Err(SourceError::TooLarge);
                }
                // Grow in increments, not byte-by-byte.
                let new_total = end.max(total + BUFFER_MIN_GROWTH as u64);
                if new_total > MAX_BUFFER_SIZE {
                    return Err(SourceError::CapacityExceeded);
                }
                inner.total_len = Some(new_total);
                if let Storage::Memory(buf) = &mut inner.storage {
                    buf.resize(new_total as usize, 0);
                }
            }
        } else if end > MAX_BUFFER_SIZE {
            return Err(SourceError::CapacityExceeded);
        }

        let received = inner.received;
        match &mut inner.storage {
            Storage::Memory(buf) => {
                if buf.len() < end as usize {
                    let new_len = (end as usize).max(buf.len() + BUFFER_MIN_GROWTH);
                    buf.resize(new_len, 0);
                }
                buf[received as usize..end as usize].copy_from_slice(data);
            }
            Storage::Disk(cache) => cache.write_at(received, data)?,
        }
        inner.received = end;
        self.data_available.notify_all();
        Ok(())
    }

    /// Mark the download as failed; blocked readers wake and observe EOF.
    pub fn set_failed(&self) {
        let mut inner = self.inner.lock();
        inner.failed = true;
        inner.finished = true;
        inner.total_len = Some(inner.received);
        self.data_available.notify_all();
    }

    /// Mark the download as complete; no more data will arrive. A
    /// declared content length is kept even when the producer finished
    /// short of it, so consumers can see the truncation.
    pub fn set_finished(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        if inner.total_len.is_none() {
            inner.total_len = Some(inner.received);
        }
        self.data_available.notify_all();
    }

    /// Force the source down. Equivalent to a failure signalled from the
    /// consumer side; any blocked reader wakes immediately.
    pub fn stop(&self) {
        debug!("byte source stopped");
        self.set_failed();
    }

    pub fn received_len(&self) -> u64 {
        self.inner.lock().received
    }

    pub fn total_len(&self) -> Option<u64> {
        self.inner.lock().total_len
    }

    pub fn has_failed(&self) -> bool {
        self.inner.lock().failed
    }

    pub fn has_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Create the consumer-side read cursor.
    pub fn reader(self: &Arc<Self>) -> SourceReader {
        SourceReader {
            source: Arc::clone(self),
            pos: 0,
        }
    }
}

/// Blocking read cursor over a [`ByteSource`].
///
/// `read` returns `Ok(0)` at end of stream *or* after a failure; callers
/// that need to distinguish check [`SourceReader::failed`].
pub struct SourceReader {
    source: Arc<ByteSource>,
    pos: u64,
}

impl SourceReader {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.source.inner.lock();
        loop {
            if self.pos < inner.received {
                let received = inner.received;
                let n = match &mut inner.storage {
                    Storage::Memory(data) => {
                        let avail = (received - self.pos) as usize;
                        let n = buf.len().min(avail);
                        let start = self.pos as usize;
                        buf[..n].copy_from_slice(&data[start..start + n]);
                        n
                    }
                    Storage::Disk(cache) => cache.read_at(self.pos, received, buf)?,
                };
                self.pos += n as u64;
                return Ok(n);
            }
            if inner.failed || inner.finished {
                return Ok(0);
            }
            self.source.data_available.wait(&mut inner);
        }
    }

    /// Fill `buf` completely, or report EOF/failure via `Ok(false)`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<bool, SourceError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }

    /// Seek to an absolute position among the already-received bytes.
    pub fn seek(&mut self, pos: u64) -> Result<(), SourceError> {
        let inner = self.source.inner.lock();
        if pos > inner.received {
            return Err(SourceError::NotYetAvailable(pos));
        }
        drop(inner);
        self.pos = pos;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn failed(&self) -> bool {
        self.source.has_failed()
    }

    pub fn source(&self) -> &Arc<ByteSource> {
        &self.source
    }
}

impl io::Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SourceReader::read(self, buf).map_err(|e| match e {
            SourceError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::Other, other),
        })
    }
}
