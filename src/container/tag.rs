//! Fixed-layout container records: the stream header, tag headers, and
//! the audio/video payload sub-headers.

use crate::core::Time;
use crate::decode::AudioParams;
use crate::source::SourceError;
use thiserror::Error;

/// Stream header length; the declared data offset must match it.
pub const HEADER_LEN: usize = 9;
/// Tag header length, also the fixed part of the previous-tag-size.
pub const TAG_HEADER_LEN: usize = 11;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid container: {0}")]
    InvalidContainer(&'static str),
    #[error("unexpected end of stream inside a record")]
    UnexpectedEof,
    #[error("previous-tag-size mismatch: expected {expected}, found {found}")]
    TagSizeMismatch { expected: u32, found: u32 },
    #[error("{track} timestamp went backwards: {prev} -> {found}")]
    TimestampRegression {
        track: &'static str,
        prev: Time,
        found: Time,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Parsed stream header: `"FLV"`, version, track flags, data offset.
#[derive(Debug, Clone, Copy)]
pub struct StreamHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
}

impl StreamHeader {
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, ContainerError> {
        if &raw[0..3] != b"FLV" {
            return Err(ContainerError::InvalidContainer("bad signature"));
        }
        let flags = raw[4];
        // Five reserved bits, audio flag, one reserved bit, video flag.
        if flags & 0b1111_1010 != 0 {
            return Err(ContainerError::InvalidContainer("reserved flag bits set"));
        }
        let data_offset = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]);
        if data_offset != HEADER_LEN as u32 {
            return Err(ContainerError::InvalidContainer("bad data offset"));
        }
        Ok(Self {
            version: raw[3],
            has_audio: flags & 0b100 != 0,
            has_video: flags & 0b001 != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Audio,
    Video,
    Script,
    Other(u8),
}

/// Per-tag header: kind, payload size, assembled 32-bit timestamp.
#[derive(Debug, Clone, Copy)]
pub struct TagHeader {
    pub kind: TagKind,
    pub data_size: u32,
    pub timestamp: Time,
}

impl TagHeader {
    pub fn parse(raw: &[u8; TAG_HEADER_LEN]) -> Result<Self, ContainerError> {
        let kind = match raw[0] {
            8 => TagKind::Audio,
            9 => TagKind::Video,
            18 => TagKind::Script,
            other => TagKind::Other(other),
        };
        let data_size = u32::from_be_bytes([0, raw[1], raw[2], raw[3]]);
        // 24-bit timestamp with an extension byte carrying bits 24..32.
        let timestamp =
            u32::from_be_bytes([raw[7], raw[4], raw[5], raw[6]]) as Time;
        let stream_id = u32::from_be_bytes([0, raw[8], raw[9], raw[10]]);
        if stream_id != 0 {
            return Err(ContainerError::InvalidContainer("nonzero stream id"));
        }
        Ok(Self {
            kind,
            data_size,
            timestamp,
        })
    }

    /// Value the next previous-tag-size field must carry.
    pub fn total_size(&self) -> u32 {
        TAG_HEADER_LEN as u32 + self.data_size
    }
}

/// Audio payload sub-header: one byte of format/rate/width/channels,
/// plus a packet-type byte for formats that carry sequence headers.
#[derive(Debug, Clone, Copy)]
pub struct AudioTagHeader {
    pub params: AudioParams,
    pub is_sequence_header: bool,
    /// Offset of the compressed payload within the tag data.
    pub data_offset: usize,
}

impl AudioTagHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        let &[first, ..] = data else {
            return Err(ContainerError::UnexpectedEof);
        };
        let format_id = first >> 4;
        let sample_rate = match (first >> 2) & 0b11 {
            0 => 5500,
            1 => 11000,
            2 => 22000,
            _ => 44000,
        };
        let is_16bit = first & 0b10 != 0;
        let channels = if first & 0b1 != 0 { 2 } else { 1 };

        let mut is_sequence_header = false;
        let mut data_offset = 1;
        if format_id == crate::decode::codec::AUDIO_FORMAT_AAC {
            let Some(&packet_type) = data.get(1) else {
                return Err(ContainerError::UnexpectedEof);
            };
            is_sequence_header = packet_type == 0;
            data_offset = 2;
        }
        Ok(Self {
            params: AudioParams {
                format_id,
                sample_rate,
                is_16bit,
                channels,
            },
            is_sequence_header,
            data_offset,
        })
    }
}

/// Video payload sub-header: frame type and codec id, plus packet type
/// and composition time for codecs that frame their payloads.
#[derive(Debug, Clone, Copy)]
pub struct VideoTagHeader {
    pub frame_type: u8,
    pub codec_id: u8,
    pub is_sequence_header: bool,
    pub composition_time: i32,
    /// Offset of the compressed payload within the tag data.
    pub data_offset: usize,
}

impl VideoTagHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        let &[first, ..] = data else {
            return Err(ContainerError::UnexpectedEof);
        };
        let frame_type = first >> 4;
        let codec_id = first & 0xf;
        if frame_type != 1 && frame_type != 2 {
            return Err(ContainerError::InvalidContainer("unexpected video frame type"));
        }

        let mut is_sequence_header = false;
        let mut composition_time = 0;
        let mut data_offset = 1;
        if codec_id == crate::decode::codec::VIDEO_CODEC_AVC {
            let &[_, packet_type, c0, c1, c2, ..] = data else {
                return Err(ContainerError::UnexpectedEof);
            };
            match packet_type {
                0 => is_sequence_header = true,
                1 | 2 => {}
                _ => {
                    return Err(ContainerError::InvalidContainer(
                        "unexpected video packet type",
                    ))
                }
            }
            // Sign-extend the 24-bit composition offset.
            composition_time = i32::from_be_bytes([c0, c1, c2, 0]) >> 8;
            data_offset = 5;
        }
        Ok(Self {
            frame_type,
            codec_id,
            is_sequence_header,
            composition_time,
            data_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_header_roundtrip() {
        let raw = [b'F', b'L', b'V', 1, 0b101, 0, 0, 0, 9];
        let header = StreamHeader::parse(&raw).unwrap();
        assert_eq!(header.version, 1);
        assert!(header.has_audio);
        assert!(header.has_video);
    }

    #[test]
    fn test_stream_header_rejects_bad_signature() {
        let raw = [b'M', b'P', b'4', 1, 0, 0, 0, 0, 9];
        assert!(matches!(
            StreamHeader::parse(&raw),
            Err(ContainerError::InvalidContainer("bad signature"))
        ));
    }

    #[test]
    fn test_stream_header_rejects_reserved_bits() {
        let raw = [b'F', b'L', b'V', 1, 0b1000_0101, 0, 0, 0, 9];
        assert!(StreamHeader::parse(&raw).is_err());
    }

    #[test]
    fn test_stream_header_rejects_bad_offset() {
        let raw = [b'F', b'L', b'V', 1, 0b101, 0, 0, 0, 10];
        assert!(StreamHeader::parse(&raw).is_err());
    }

    #[test]
    fn test_tag_header_timestamp_extension() {
        // type 9, size 0x000102, ts 0x030405 with extension 0x01.
        let raw = [9, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x01, 0, 0, 0];
        let tag = TagHeader::parse(&raw).unwrap();
        assert_eq!(tag.kind, TagKind::Video);
        assert_eq!(tag.data_size, 0x0102);
        assert_eq!(tag.timestamp, 0x0103_0405);
        assert_eq!(tag.total_size(), 11 + 0x0102);
    }

    #[test]
    fn test_tag_header_rejects_stream_id() {
        let raw = [8, 0, 0, 1, 0, 0, 0, 0, 0, 0, 7];
        assert!(TagHeader::parse(&raw).is_err());
    }

    #[test]
    fn test_audio_tag_header_pcm() {
        // format 3 (PCM-LE), rate 3 (44 kHz), 16-bit, stereo.
        let header = AudioTagHeader::parse(&[0x3f, 0xaa]).unwrap();
        assert_eq!(header.params.format_id, 3);
        assert_eq!(header.params.sample_rate, 44000);
        assert!(header.params.is_16bit);
        assert_eq!(header.params.channels, 2);
        assert!(!header.is_sequence_header);
        assert_eq!(header.data_offset, 1);
    }

    #[test]
    fn test_audio_tag_header_aac_sequence() {
        // format 10 (AAC) carries a packet-type byte.
        let header = AudioTagHeader::parse(&[0xaf, 0x00, 0x12]).unwrap();
        assert!(header.is_sequence_header);
        assert_eq!(header.data_offset, 2);
    }

    #[test]
    fn test_video_tag_header_avc() {
        let header = VideoTagHeader::parse(&[0x17, 0x00, 0, 0, 0, 0xbb]).unwrap();
        assert_eq!(header.frame_type, 1);
        assert_eq!(header.codec_id, 7);
        assert!(header.is_sequence_header);
        assert_eq!(header.data_offset, 5);
    }

    #[test]
    fn test_video_tag_header_rejects_frame_type() {
        assert!(VideoTagHeader::parse(&[0x57]).is_err());
    }
}
