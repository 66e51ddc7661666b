//! Codec seam: the bit-level decoding grammar is a black box behind
//! these traits. The pipeline only routes compressed payloads in and
//! decoded frames out; hosts plug real codecs in through a
//! [`CodecProvider`].

use crate::core::Time;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported codec id {0}")]
    UnsupportedCodec(u8),
    #[error("malformed codec configuration header")]
    InvalidHeader,
}

/// Audio sub-header fields as the container declares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub format_id: u8,
    pub sample_rate: u32,
    pub is_16bit: bool,
    pub channels: u32,
}

/// Container audio format ids this crate knows by name.
pub const AUDIO_FORMAT_PCM_PLATFORM: u8 = 0;
pub const AUDIO_FORMAT_PCM_LE: u8 = 3;
pub const AUDIO_FORMAT_AAC: u8 = 10;

/// Container video codec ids this crate knows by name.
pub const VIDEO_CODEC_H263: u8 = 2;
pub const VIDEO_CODEC_AVC: u8 = 7;

/// A run of decoded interleaved samples starting at `time`.
pub struct AudioChunk {
    pub(crate) samples: Vec<i16>,
    pub(crate) consumed: usize,
    pub(crate) time: Time,
}

impl AudioChunk {
    pub fn new(time: Time, samples: Vec<i16>) -> Self {
        Self {
            samples,
            consumed: 0,
            time,
        }
    }

    pub fn remaining(&self) -> &[i16] {
        &self.samples[self.consumed..]
    }

    /// Timestamp of the first unconsumed sample.
    pub(crate) fn current_time(&self, sample_rate: u32, channels: u32) -> Time {
        let per_ms = (sample_rate as u64 * channels as u64) / 1000;
        if per_ms == 0 {
            return self.time;
        }
        self.time + self.consumed as u64 / per_ms
    }

    pub(crate) fn end_time(&self, sample_rate: u32, channels: u32) -> Time {
        let per_ms = (sample_rate as u64 * channels as u64) / 1000;
        if per_ms == 0 {
            return self.time;
        }
        self.time + self.samples.len() as u64 / per_ms
    }

    /// Advance the consumption cursor to `time`, keeping it aligned to
    /// whole sample frames.
    pub(crate) fn skip_to(&mut self, time: Time, sample_rate: u32, channels: u32) {
        if time <= self.time {
            return;
        }
        let per_ms = (sample_rate as u64 * channels as u64) / 1000;
        let mut target = ((time - self.time) * per_ms) as usize;
        target -= target % channels.max(1) as usize;
        self.consumed = self.consumed.max(target.min(self.samples.len()));
    }
}

/// A decoded video picture. The pixel layout is codec-defined; the
/// pipeline hands the frame to the render collaborator untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub time: Time,
}

pub trait AudioCodec: Send {
    /// Feed a codec-configuration payload (e.g. an AAC sequence
    /// header). Called zero or one times, before any `decode`.
    fn configure(&mut self, header: &[u8]) -> Result<(), CodecError>;

    /// Output sample rate in Hz; 0 until known.
    fn sample_rate(&self) -> u32;

    /// Output channel count; 0 until known.
    fn channels(&self) -> u32;

    fn decode(&mut self, payload: &[u8], time: Time) -> Result<Vec<AudioChunk>, CodecError>;
}

pub trait VideoCodec: Send {
    fn configure(&mut self, header: &[u8]) -> Result<(), CodecError>;

    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Codec-inferred frame rate, when the bitstream declares one.
    fn frame_rate(&self) -> Option<f64>;

    fn decode(&mut self, payload: &[u8], time: Time) -> Result<Option<VideoFrame>, CodecError>;
}

/// Maps container codec ids to codec implementations.
pub trait CodecProvider: Send + Sync {
    fn audio_codec(&self, params: &AudioParams) -> Result<Box<dyn AudioCodec>, CodecError>;
    fn video_codec(&self, codec_id: u8) -> Result<Box<dyn VideoCodec>, CodecError>;
}

/// Codecs shipped with the crate: linear PCM audio only. Every other
/// format degrades that track unless the host provides a codec for it.
pub struct BuiltinCodecs;

impl CodecProvider for BuiltinCodecs {
    fn audio_codec(&self, params: &AudioParams) -> Result<Box<dyn AudioCodec>, CodecError> {
        match params.format_id {
            AUDIO_FORMAT_PCM_PLATFORM | AUDIO_FORMAT_PCM_LE => {
                Ok(Box::new(LinearPcmCodec::new(params)))
            }
            other => Err(CodecError::UnsupportedCodec(other)),
        }
    }

    fn video_codec(&self, codec_id: u8) -> Result<Box<dyn VideoCodec>, CodecError> {
        Err(CodecError::UnsupportedCodec(codec_id))
    }
}

/// Uncompressed little-endian PCM, the one audio format that needs no
/// external codec.
pub struct LinearPcmCodec {
    sample_rate: u32,
    channels: u32,
    is_16bit: bool,
}

impl LinearPcmCodec {
    pub fn new(params: &AudioParams) -> Self {
        Self {
            sample_rate: params.sample_rate,
            channels: params.channels,
            is_16bit: params.is_16bit,
        }
    }
}

impl AudioCodec for LinearPcmCodec {
    fn configure(&mut self, _header: &[u8]) -> Result<(), CodecError> {
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn decode(&mut self, payload: &[u8], time: Time) -> Result<Vec<AudioChunk>, CodecError> {
        let samples: Vec<i16> = if self.is_16bit {
            payload
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect()
        } else {
            payload.iter().map(|&b| ((b as i16) - 0x80) << 8).collect()
        };
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![AudioChunk::new(time, samples)])
    }
}

/// Pass-through video "codec" for hosts and tests: the configuration
/// header is `width:u32 height:u32` (big-endian) optionally followed by
/// a big-endian `f64` frame rate; each payload is one finished frame.
pub struct RawVideoCodec {
    width: u32,
    height: u32,
    frame_rate: Option<f64>,
}

impl RawVideoCodec {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            frame_rate: None,
        }
    }
}

impl Default for RawVideoCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoCodec for RawVideoCodec {
    fn configure(&mut self, header: &[u8]) -> Result<(), CodecError> {
        if header.len() < 8 {
            return Err(CodecError::InvalidHeader);
        }
        self.width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        self.height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidHeader);
        }
        if header.len() >= 16 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&header[8..16]);
            self.frame_rate = Some(f64::from_be_bytes(raw));
        }
        Ok(())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.width == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    fn decode(&mut self, payload: &[u8], time: Time) -> Result<Option<VideoFrame>, CodecError> {
        if self.width == 0 {
            return Err(CodecError::InvalidHeader);
        }
        Ok(Some(VideoFrame {
            data: payload.to_vec(),
            width: self.width,
            height: self.height,
            time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_params(is_16bit: bool) -> AudioParams {
        AudioParams {
            format_id: AUDIO_FORMAT_PCM_LE,
            sample_rate: 44100,
            is_16bit,
            channels: 2,
        }
    }

    #[test]
    fn test_pcm_16bit_decode() {
        let mut codec = LinearPcmCodec::new(&pcm_params(true));
        let chunks = codec.decode(&[0x01, 0x00, 0xff, 0x7f], 5).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].remaining(), &[1, i16::MAX]);
        assert_eq!(chunks[0].time, 5);
    }

    #[test]
    fn test_pcm_8bit_centers_on_zero() {
        let mut codec = LinearPcmCodec::new(&pcm_params(false));
        let chunks = codec.decode(&[0x80, 0x00, 0xff], 0).unwrap();
        assert_eq!(chunks[0].remaining(), &[0, -32768, 32512]);
    }

    #[test]
    fn test_builtin_provider_rejects_unknown_audio() {
        let params = AudioParams {
            format_id: AUDIO_FORMAT_AAC,
            sample_rate: 44100,
            is_16bit: true,
            channels: 2,
        };
        assert!(matches!(
            BuiltinCodecs.audio_codec(&params),
            Err(CodecError::UnsupportedCodec(AUDIO_FORMAT_AAC))
        ));
    }

    #[test]
    fn test_raw_video_requires_configuration() {
        let mut codec = RawVideoCodec::new();
        assert!(matches!(
            codec.decode(b"xxxx", 0),
            Err(CodecError::InvalidHeader)
        ));

        let mut header = Vec::new();
        header.extend_from_slice(&320u32.to_be_bytes());
        header.extend_from_slice(&240u32.to_be_bytes());
        header.extend_from_slice(&24.0f64.to_be_bytes());
        codec.configure(&header).unwrap();
        assert_eq!(codec.dimensions(), Some((320, 240)));
        assert_eq!(codec.frame_rate(), Some(24.0));

        let frame = codec.decode(&[1, 2, 3], 40).unwrap().unwrap();
        assert_eq!(frame.width, 320);
        assert_eq!(frame.time, 40);
    }

    #[test]
    fn test_chunk_skip_to_alignment() {
        // 1 kHz stereo: 2 samples per millisecond.
        let mut chunk = AudioChunk::new(100, vec![0i16; 20]);
        chunk.skip_to(103, 1000, 2);
        assert_eq!(chunk.consumed, 6);
        assert_eq!(chunk.current_time(1000, 2), 103);
        // Never moves backwards.
        chunk.skip_to(101, 1000, 2);
        assert_eq!(chunk.consumed, 6);
        assert_eq!(chunk.end_time(1000, 2), 110);
    }
}
