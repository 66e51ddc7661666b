//! Audio output seam. The playback driver only sees these traits; any
//! backend that can create a stream over an [`AudioDecoder`] and report
//! its play cursor plugs in here.

use std::sync::Arc;
use thiserror::Error;

use crate::core::Time;
use crate::decode::AudioDecoder;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    DeviceUnavailable,
    #[error("audio stream: {0}")]
    Stream(String),
}

/// One playing output stream bound to a decoder.
pub trait AudioStream: Send {
    /// Device-reported play position in milliseconds. Meaningless when
    /// [`AudioStream::is_timing_available`] is false.
    fn played_time(&self) -> Time;

    /// Whether `played_time` tracks a real device cursor. When false
    /// the driver falls back to frame-rate ticking.
    fn is_timing_available(&self) -> bool;

    /// Pull more decoded samples. Callback-driven backends ignore this;
    /// the null backend drains the decoder here.
    fn fill(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    fn is_paused(&self) -> bool;
}

pub trait AudioBackend: Send + Sync {
    fn create_stream(
        &self,
        decoder: Arc<AudioDecoder>,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}

/// Backend that discards samples and reports no timing; playback then
/// runs entirely on the frame-rate clock.
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn create_stream(
        &self,
        decoder: Arc<AudioDecoder>,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        Ok(Box::new(NullStream {
            decoder,
            paused: false,
        }))
    }
}

struct NullStream {
    decoder: Arc<AudioDecoder>,
    paused: bool,
}

impl AudioStream for NullStream {
    fn played_time(&self) -> Time {
        0
    }

    fn is_timing_available(&self) -> bool {
        false
    }

    fn fill(&mut self) {
        if self.paused {
            return;
        }
        // Drain and discard so the decode side never stalls on a full
        // ring.
        let mut scratch = [0i16; 2048];
        while self.decoder.copy_frame(&mut scratch) == scratch.len() {}
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::codec::{AudioParams, LinearPcmCodec, AUDIO_FORMAT_PCM_LE};
    use crate::decode::AudioDecoder;

    #[test]
    fn test_null_stream_drains_decoder() {
        let decoder = Arc::new(AudioDecoder::new(Box::new(LinearPcmCodec::new(
            &AudioParams {
                format_id: AUDIO_FORMAT_PCM_LE,
                sample_rate: 44100,
                is_16bit: true,
                channels: 2,
            },
        ))));
        let bytes: Vec<u8> = (0..64i16).flat_map(|s| s.to_le_bytes()).collect();
        decoder.decode(&bytes, 0).unwrap();

        let mut stream = NullBackend.create_stream(Arc::clone(&decoder)).unwrap();
        assert!(!stream.is_timing_available());
        stream.fill();
        assert!(!decoder.has_decoded_frames());
    }

    #[test]
    fn test_null_stream_pause_stops_draining() {
        let decoder = Arc::new(AudioDecoder::null());
        let mut stream = NullBackend.create_stream(decoder).unwrap();
        stream.pause();
        assert!(stream.is_paused());
        stream.fill();
        stream.resume();
        assert!(!stream.is_paused());
    }
}
