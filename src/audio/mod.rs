//! Pluggable audio output backends.

pub mod backend;
#[cfg(feature = "cpal-output")]
pub mod cpal;

pub use backend::{AudioBackend, AudioError, AudioStream, NullBackend};
#[cfg(feature = "cpal-output")]
pub use self::cpal::CpalBackend;
