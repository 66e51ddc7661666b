//! Audio decoder: compressed payloads in, interleaved `i16` samples
//! out, with the `PreInit → Init → Valid → Flushed` lifecycle.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use super::codec::{AudioChunk, AudioCodec, CodecError};
use super::DecoderState;
use crate::buffer::FrameQueue;
use crate::core::Time;

/// Decoded-chunk ring capacity.
pub const AUDIO_QUEUE_CAPACITY: usize = 150;

pub struct AudioDecoder {
    state: Mutex<DecoderState>,
    queue: FrameQueue<AudioChunk>,
    codec: Mutex<Box<dyn AudioCodec>>,
    sample_rate: AtomicU32,
    channels: AtomicU32,
}

impl AudioDecoder {
    pub fn new(codec: Box<dyn AudioCodec>) -> Self {
        let sample_rate = codec.sample_rate();
        let channels = codec.channels();
        let state = if sample_rate > 0 && channels > 0 {
            DecoderState::Init
        } else {
            DecoderState::PreInit
        };
        Self {
            state: Mutex::new(state),
            queue: FrameQueue::new(AUDIO_QUEUE_CAPACITY),
            codec: Mutex::new(codec),
            sample_rate: AtomicU32::new(sample_rate),
            channels: AtomicU32::new(channels),
        }
    }

    /// Always-valid silent decoder, used so that video-only playback
    /// still has an audio clock slot to fall back from.
    pub fn null() -> Self {
        struct NullCodec;
        impl AudioCodec for NullCodec {
            fn configure(&mut self, _header: &[u8]) -> Result<(), CodecError> {
                Ok(())
            }
            fn sample_rate(&self) -> u32 {
                44100
            }
            fn channels(&self) -> u32 {
                2
            }
            fn decode(&mut self, _payload: &[u8], _time: Time) -> Result<Vec<AudioChunk>, CodecError> {
                Ok(Vec::new())
            }
        }
        let decoder = Self::new(Box::new(NullCodec));
        *decoder.state.lock() = DecoderState::Valid;
        decoder
    }

    /// Feed a codec-configuration payload (sequence header).
    pub fn configure(&self, header: &[u8]) -> Result<(), CodecError> {
        let mut codec = self.codec.lock();
        codec.configure(header)?;
        self.sample_rate.store(codec.sample_rate(), Ordering::Release);
        self.channels.store(codec.channels(), Ordering::Release);
        let mut state = self.state.lock();
        if *state == DecoderState::PreInit {
            *state = DecoderState::Init;
        }
        Ok(())
    }

    /// Decode one compressed payload; blocks on ring-buffer
    /// backpressure. Returns the number of chunks produced.
    pub fn decode(&self, payload: &[u8], time: Time) -> Result<usize, CodecError> {
        let chunks = {
            let mut codec = self.codec.lock();
            let chunks = codec.decode(payload, time)?;
            self.sample_rate.store(codec.sample_rate(), Ordering::Release);
            self.channels.store(codec.channels(), Ordering::Release);
            chunks
        };
        let mut produced = 0;
        for chunk in chunks {
            {
                let mut state = self.state.lock();
                if *state != DecoderState::Flushed {
                    *state = DecoderState::Valid;
                }
            }
            if !self.queue.push(chunk) {
                debug!("audio chunk dropped by flush");
                break;
            }
            produced += 1;
        }
        Ok(produced)
    }

    pub fn has_decoded_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Copy decoded samples into `dest` without blocking, draining
    /// chunks as they are exhausted. Returns samples copied.
    pub fn copy_frame(&self, dest: &mut [i16]) -> usize {
        let mut filled = 0;
        while filled < dest.len() {
            let copied = self.queue.with_front_mut(|chunk| {
                let src = chunk.remaining();
                let n = src.len().min(dest.len() - filled);
                dest[filled..filled + n].copy_from_slice(&src[..n]);
                chunk.consumed += n;
                (n, chunk.remaining().is_empty())
            });
            match copied {
                Some((n, exhausted)) => {
                    filled += n;
                    if exhausted {
                        self.queue.try_pop();
                    }
                }
                None => break,
            }
        }
        filled
    }

    /// Timestamp of the next sample to be consumed.
    pub fn front_time(&self) -> Option<Time> {
        let rate = self.sample_rate();
        let channels = self.channels();
        self.queue.with_front(|c| c.current_time(rate, channels))
    }

    /// Discard decoded audio older than `time`, including the partial
    /// span inside the chunk that straddles it.
    pub fn skip_until(&self, time: Time) {
        let rate = self.sample_rate();
        let channels = self.channels();
        if rate == 0 || channels == 0 {
            return;
        }
        loop {
            match self.queue.with_front(|c| c.end_time(rate, channels)) {
                Some(end) if end <= time => {
                    self.queue.try_pop();
                }
                Some(_) => {
                    self.queue.with_front_mut(|c| c.skip_to(time, rate, channels));
                    return;
                }
                None => return,
            }
        }
    }

    /// Discard everything currently decoded.
    pub fn skip_all(&self) {
        while self.queue.try_pop().is_some() {}
    }

    /// Drop the front chunk unconditionally.
    pub fn discard_frame(&self) {
        self.queue.try_pop();
    }

    pub fn set_flushing(&self) {
        self.queue.set_flushing();
        if self.queue.is_flushed() {
            *self.state.lock() = DecoderState::Flushed;
        }
    }

    /// Block until every decoded chunk has been drained after
    /// `set_flushing`.
    pub fn wait_flushed(&self) {
        self.queue.wait_flushed();
        *self.state.lock() = DecoderState::Flushed;
    }

    pub fn state(&self) -> DecoderState {
        *self.state.lock()
    }

    pub fn is_valid(&self) -> bool {
        self.state() == DecoderState::Valid
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn channels(&self) -> u32 {
        self.channels.load(Ordering::Acquire)
    }

    /// Byte rate of the decoded stream per millisecond of playback.
    pub fn bytes_per_ms(&self) -> u64 {
        self.sample_rate() as u64 * self.channels() as u64 * 2 / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::codec::{AudioParams, LinearPcmCodec, AUDIO_FORMAT_PCM_LE};
    use std::sync::Arc;
    use std::thread;

    fn pcm_decoder() -> AudioDecoder {
        // 1 kHz stereo keeps the time arithmetic easy to follow.
        AudioDecoder::new(Box::new(LinearPcmCodec::new(&AudioParams {
            format_id: AUDIO_FORMAT_PCM_LE,
            sample_rate: 1000,
            is_16bit: true,
            channels: 2,
        })))
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_state_progression() {
        let decoder = pcm_decoder();
        assert_eq!(decoder.state(), DecoderState::Init);
        assert!(!decoder.is_valid());

        decoder.decode(&pcm_bytes(&[1, 2]), 0).unwrap();
        assert!(decoder.is_valid());
        assert!(decoder.has_decoded_frames());
    }

    #[test]
    fn test_copy_frame_across_chunks() {
        let decoder = pcm_decoder();
        decoder.decode(&pcm_bytes(&[1, 2]), 0).unwrap();
        decoder.decode(&pcm_bytes(&[3, 4, 5, 6]), 1).unwrap();

        let mut out = [0i16; 3];
        assert_eq!(decoder.copy_frame(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        let mut rest = [0i16; 8];
        assert_eq!(decoder.copy_frame(&mut rest), 3);
        assert_eq!(&rest[..3], &[4, 5, 6]);
        assert!(!decoder.has_decoded_frames());
    }

    #[test]
    fn test_skip_until_partial_chunk() {
        let decoder = pcm_decoder();
        // 2 samples per ms; 10 ms of audio starting at t=0.
        decoder.decode(&pcm_bytes(&(0..20).collect::<Vec<i16>>()), 0).unwrap();
        decoder.skip_until(4);
        assert_eq!(decoder.front_time(), Some(4));
        let mut out = [0i16; 2];
        decoder.copy_frame(&mut out);
        assert_eq!(out, [8, 9]);
    }

    #[test]
    fn test_flush_handshake() {
        let decoder = Arc::new(pcm_decoder());
        decoder.decode(&pcm_bytes(&[1, 2, 3, 4]), 0).unwrap();
        decoder.set_flushing();
        assert_ne!(decoder.state(), DecoderState::Flushed);

        let waiter = {
            let decoder = Arc::clone(&decoder);
            thread::spawn(move || decoder.wait_flushed())
        };
        decoder.skip_all();
        waiter.join().unwrap();
        assert_eq!(decoder.state(), DecoderState::Flushed);

        // New payloads are rejected after the flush.
        assert_eq!(decoder.decode(&pcm_bytes(&[9, 9]), 50).unwrap(), 0);
    }

    #[test]
    fn test_null_decoder_is_valid() {
        let decoder = AudioDecoder::null();
        assert!(decoder.is_valid());
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.bytes_per_ms(), 176);
        assert_eq!(decoder.decode(b"ignored", 0).unwrap(), 0);
    }
}
