//! Video decoder: compressed payloads in, timestamped frames out. The
//! playback tick promotes the newest frame whose timestamp has been
//! reached to the "current" slot handed to the render collaborator.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::codec::{CodecError, VideoCodec, VideoFrame};
use super::DecoderState;
use crate::buffer::FrameQueue;
use crate::core::Time;

/// Decoded-frame ring capacity.
pub const VIDEO_QUEUE_CAPACITY: usize = 80;

pub struct VideoDecoder {
    state: Mutex<DecoderState>,
    queue: FrameQueue<Arc<VideoFrame>>,
    codec: Mutex<Box<dyn VideoCodec>>,
    width: AtomicU32,
    height: AtomicU32,
    frame_rate: Mutex<Option<f64>>,
    /// Newest frame whose timestamp the clock has passed; stays valid
    /// for the render collaborator until the next tick replaces it.
    current: Mutex<Option<Arc<VideoFrame>>>,
}

impl VideoDecoder {
    pub fn new(codec: Box<dyn VideoCodec>) -> Self {
        let dims = codec.dimensions();
        let rate = codec.frame_rate();
        let state = if dims.is_some() {
            DecoderState::Init
        } else {
            DecoderState::PreInit
        };
        let (w, h) = dims.unwrap_or((0, 0));
        Self {
            state: Mutex::new(state),
            queue: FrameQueue::new(VIDEO_QUEUE_CAPACITY),
            codec: Mutex::new(codec),
            width: AtomicU32::new(w),
            height: AtomicU32::new(h),
            frame_rate: Mutex::new(rate),
            current: Mutex::new(None),
        }
    }

    /// Feed the codec-configuration payload (sequence header).
    pub fn configure(&self, header: &[u8]) -> Result<(), CodecError> {
        let mut codec = self.codec.lock();
        codec.configure(header)?;
        if let Some((w, h)) = codec.dimensions() {
            self.width.store(w, Ordering::Release);
            self.height.store(h, Ordering::Release);
            let mut state = self.state.lock();
            if *state == DecoderState::PreInit {
                *state = DecoderState::Init;
            }
        }
        *self.frame_rate.lock() = codec.frame_rate();
        Ok(())
    }

    /// Decode one compressed payload; blocks on ring-buffer
    /// backpressure. Returns the number of frames produced.
    pub fn decode(&self, payload: &[u8], time: Time) -> Result<usize, CodecError> {
        let frame = {
            let mut codec = self.codec.lock();
            let frame = codec.decode(payload, time)?;
            if let Some((w, h)) = codec.dimensions() {
                self.width.store(w, Ordering::Release);
                self.height.store(h, Ordering::Release);
            }
            *self.frame_rate.lock() = codec.frame_rate();
            frame
        };
        let Some(frame) = frame else {
            return Ok(0);
        };
        {
            let mut state = self.state.lock();
            if *state != DecoderState::Flushed {
                *state = DecoderState::Valid;
            }
        }
        if !self.queue.push(Arc::new(frame)) {
            debug!("video frame dropped by flush");
            return Ok(0);
        }
        Ok(1)
    }

    pub fn has_decoded_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Discard frames the clock has passed, keeping the newest of them
    /// as the current frame.
    pub fn skip_until(&self, time: Time) {
        loop {
            let due = self.queue.with_front(|f| f.time <= time).unwrap_or(false);
            if !due {
                return;
            }
            if let Some(frame) = self.queue.try_pop() {
                *self.current.lock() = Some(frame);
            }
        }
    }

    /// Drop every queued frame without promoting any of them.
    pub fn skip_all(&self) {
        while self.queue.try_pop().is_some() {}
    }

    /// Drop the front frame unconditionally.
    pub fn discard_frame(&self) {
        self.queue.try_pop();
    }

    /// Handle for the render/upload collaborator; valid until the next
    /// tick replaces it.
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.current.lock().clone()
    }

    pub fn front_time(&self) -> Option<Time> {
        self.queue.with_front(|f| f.time)
    }

    pub fn set_flushing(&self) {
        self.queue.set_flushing();
        if self.queue.is_flushed() {
            *self.state.lock() = DecoderState::Flushed;
        }
    }

    /// Block until every decoded frame has been drained after
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

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Codec-inferred frame rate, if the bitstream declares one.
    pub fn frame_rate(&self) -> Option<f64> {
        *self.frame_rate.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::codec::RawVideoCodec;

    fn configured_decoder() -> VideoDecoder {
        let decoder = VideoDecoder::new(Box::new(RawVideoCodec::new()));
        let mut header = Vec::new();
        header.extend_from_slice(&320u32.to_be_bytes());
        header.extend_from_slice(&240u32.to_be_bytes());
        decoder.configure(&header).unwrap();
        decoder
    }

    #[test]
    fn test_configure_reaches_init() {
        let decoder = VideoDecoder::new(Box::new(RawVideoCodec::new()));
        assert_eq!(decoder.state(), DecoderState::PreInit);
        let mut header = Vec::new();
        header.extend_from_slice(&320u32.to_be_bytes());
        header.extend_from_slice(&240u32.to_be_bytes());
        decoder.configure(&header).unwrap();
        assert_eq!(decoder.state(), DecoderState::Init);
        assert_eq!((decoder.width(), decoder.height()), (320, 240));
    }

    #[test]
    fn test_decode_reaches_valid() {
        let decoder = configured_decoder();
        assert_eq!(decoder.decode(&[0xaa], 0).unwrap(), 1);
        assert!(decoder.is_valid());
        assert!(decoder.has_decoded_frames());
    }

    #[test]
    fn test_skip_until_promotes_newest_due_frame() {
        let decoder = configured_decoder();
        for t in [0u64, 40, 80, 120] {
            decoder.decode(&[t as u8], t).unwrap();
        }
        decoder.skip_until(90);
        let current = decoder.current_frame().unwrap();
        assert_eq!(current.time, 80);
        // The t=120 frame is still queued for a later tick.
        assert_eq!(decoder.front_time(), Some(120));

        decoder.skip_until(90);
        assert_eq!(decoder.current_frame().unwrap().time, 80);
    }

    #[test]
    fn test_flush_on_empty_is_immediate() {
        let decoder = configured_decoder();
        decoder.set_flushing();
        assert_eq!(decoder.state(), DecoderState::Flushed);
        decoder.wait_flushed();
        // Payloads after the flush never enter the queue.
        assert_eq!(decoder.decode(&[1], 0).unwrap(), 0);
    }

    #[test]
    fn test_codec_failure_surfaces() {
        let decoder = VideoDecoder::new(Box::new(RawVideoCodec::new()));
        assert!(matches!(
            decoder.decode(&[1, 2, 3], 0),
            Err(CodecError::InvalidHeader)
        ));
        assert_eq!(decoder.state(), DecoderState::PreInit);
    }
}
