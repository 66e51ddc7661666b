//! Streaming byte-source abstraction: a pull-based cursor fed by a
//! push-based producer, with an optional disk-backed cache window.

pub mod byte_source;
pub mod cache;

pub use byte_source::{ByteSource, SourceError, SourceReader, BUFFER_MIN_GROWTH, MAX_BUFFER_SIZE};
pub use cache::{DiskCache, CACHE_WINDOW_SIZE};
