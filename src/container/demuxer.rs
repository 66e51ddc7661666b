//! Tag-walking demuxer: pulls records off a byte source one at a time
//! and routes payloads to per-track decoders.

use std::sync::Arc;
use tracing::{debug, warn};

use super::metadata::{parse_script_data, StreamMetadata};
use super::tag::{
    AudioTagHeader, ContainerError, StreamHeader, TagHeader, TagKind, VideoTagHeader, HEADER_LEN,
    TAG_HEADER_LEN,
};
use crate::core::Time;
use crate::decode::{AudioDecoder, CodecProvider, VideoDecoder};
use crate::source::SourceReader;

enum DemuxState {
    ExpectHeader,
    ExpectTag,
    Done,
}

/// Stepwise container reader.
///
/// Each `next_tag` call consumes exactly one record, so the driving
/// loop can poll its abort flag between tags. Decoders are created
/// lazily on the first tag of their track; a codec failure degrades
/// that one track and playback continues without it.
pub struct Demuxer {
    reader: SourceReader,
    codecs: Arc<dyn CodecProvider>,
    state: DemuxState,
    header: Option<StreamHeader>,
    expected_prev_size: u32,
    audio: Option<Arc<AudioDecoder>>,
    video: Option<Arc<VideoDecoder>>,
    audio_failed: bool,
    video_failed: bool,
    last_audio_ts: Option<Time>,
    last_video_ts: Option<Time>,
    pending_metadata: Option<StreamMetadata>,
}

impl Demuxer {
    pub fn new(reader: SourceReader, codecs: Arc<dyn CodecProvider>) -> Self {
        Self {
            reader,
            codecs,
            state: DemuxState::ExpectHeader,
            header: None,
            expected_prev_size: 0,
            audio: None,
            video: None,
            audio_failed: false,
            video_failed: false,
            last_audio_ts: None,
            last_video_ts: None,
            pending_metadata: None,
        }
    }

    /// Consume the next record. Returns `Ok(false)` on clean end of
    /// stream, after switching both decoders to flushing mode.
    pub fn next_tag(&mut self) -> Result<bool, ContainerError> {
        match self.state {
            DemuxState::ExpectHeader => {
                self.read_header()?;
                Ok(true)
            }
            DemuxState::ExpectTag => {
                let more = self.read_tag()?;
                if !more {
                    self.finish();
                }
                Ok(more)
            }
            DemuxState::Done => Ok(false),
        }
    }

    fn read_header(&mut self) -> Result<(), ContainerError> {
        let mut raw = [0u8; HEADER_LEN];
        if !self.reader.read_exact(&mut raw)? {
            return Err(ContainerError::UnexpectedEof);
        }
        let header = StreamHeader::parse(&raw)?;
        debug!(
            version = header.version,
            has_audio = header.has_audio,
            has_video = header.has_video,
            "stream header parsed"
        );
        self.header = Some(header);
        self.state = DemuxState::ExpectTag;
        self.expected_prev_size = 0;
        Ok(())
    }

    fn read_tag(&mut self) -> Result<bool, ContainerError> {
        // Previous-tag-size cross-check: the stream's own record of how
        // big the last tag was must match what we consumed.
        let mut prev_raw = [0u8; 4];
        if !self.reader.read_exact(&mut prev_raw)? {
            return Err(ContainerError::UnexpectedEof);
        }
        let prev = u32::from_be_bytes(prev_raw);
        if prev != self.expected_prev_size {
            return Err(ContainerError::TagSizeMismatch {
                expected: self.expected_prev_size,
                found: prev,
            });
        }

        // End of stream is only clean at a record boundary.
        let mut first = [0u8; 1];
        if self.reader.read(&mut first)? == 0 {
            return Ok(false);
        }
        let mut raw = [0u8; TAG_HEADER_LEN];
        raw[0] = first[0];
        if !self.reader.read_exact(&mut raw[1..])? {
            return Err(ContainerError::UnexpectedEof);
        }
        let tag = TagHeader::parse(&raw)?;
        let mut payload = vec![0u8; tag.data_size as usize];
        if !self.reader.read_exact(&mut payload)? {
            return Err(ContainerError::UnexpectedEof);
        }
        self.expected_prev_size = tag.total_size();

        match tag.kind {
            TagKind::Audio => self.handle_audio(tag.timestamp, &payload)?,
            TagKind::Video => self.handle_video(tag.timestamp, &payload)?,
            TagKind::Script => {
                if let Some(metadata) = parse_script_data(&payload)? {
                    debug!(?metadata, "metadata tag parsed");
                    self.pending_metadata = Some(metadata);
                }
            }
            TagKind::Other(kind) => {
                warn!(kind, "skipping unknown tag type");
            }
        }
        Ok(true)
    }

    fn handle_audio(&mut self, timestamp: Time, payload: &[u8]) -> Result<(), ContainerError> {
        if self.audio_failed {
            return Ok(());
        }
        if let Some(prev) = self.last_audio_ts {
            if timestamp < prev {
                return Err(ContainerError::TimestampRegression {
                    track: "audio",
                    prev,
                    found: timestamp,
                });
            }
        }
        self.last_audio_ts = Some(timestamp);

        let header = AudioTagHeader::parse(payload)?;
        if self.audio.is_none() {
            match self.codecs.audio_codec(&header.params) {
                Ok(codec) => self.audio = Some(Arc::new(AudioDecoder::new(codec))),
                Err(err) => {
                    warn!(%err, "audio track unavailable");
                    self.audio_failed = true;
                    return Ok(());
                }
            }
        }
        let decoder = self.audio.as_ref().map(Arc::clone);
        if let Some(decoder) = decoder {
            let data = &payload[header.data_offset..];
            let result = if header.is_sequence_header {
                decoder.configure(data).map(|_| 0)
            } else {
                decoder.decode(data, timestamp)
            };
            if let Err(err) = result {
                warn!(%err, "audio track degraded");
                self.audio = None;
                self.audio_failed = true;
            }
        }
        Ok(())
    }

    fn handle_video(&mut self, timestamp: Time, payload: &[u8]) -> Result<(), ContainerError> {
        if self.video_failed {
            return Ok(());
        }
        if let Some(prev) = self.last_video_ts {
            if timestamp < prev {
                return Err(ContainerError::TimestampRegression {
                    track: "video",
                    prev,
                    found: timestamp,
                });
            }
        }
        self.last_video_ts = Some(timestamp);

        let header = VideoTagHeader::parse(payload)?;
        if self.video.is_none() {
            match self.codecs.video_codec(header.codec_id) {
                Ok(codec) => self.video = Some(Arc::new(VideoDecoder::new(codec))),
                Err(err) => {
                    warn!(%err, "video track unavailable");
                    self.video_failed = true;
                    return Ok(());
                }
            }
        }
        let decoder = self.video.as_ref().map(Arc::clone);
        if let Some(decoder) = decoder {
            let data = &payload[header.data_offset..];
            let result = if header.is_sequence_header {
                decoder.configure(data).map(|_| 0)
            } else {
                decoder.decode(data, timestamp)
            };
            if let Err(err) = result {
                warn!(%err, "video track degraded");
                self.video = None;
                self.video_failed = true;
            }
        }
        Ok(())
    }

    /// Clean end of stream: switch both decoders to drain-only mode.
    fn finish(&mut self) {
        debug!("end of stream");
        self.state = DemuxState::Done;
        if let Some(audio) = &self.audio {
            audio.set_flushing();
        }
        if let Some(video) = &self.video {
            video.set_flushing();
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, DemuxState::Done)
    }

    pub fn header(&self) -> Option<&StreamHeader> {
        self.header.as_ref()
    }

    pub fn audio_decoder(&self) -> Option<Arc<AudioDecoder>> {
        self.audio.as_ref().map(Arc::clone)
    }

    pub fn video_decoder(&self) -> Option<Arc<VideoDecoder>> {
        self.video.as_ref().map(Arc::clone)
    }

    pub fn audio_failed(&self) -> bool {
        self.audio_failed
    }

    pub fn video_failed(&self) -> bool {
        self.video_failed
    }

    /// Metadata parsed since the last call, if any.
    pub fn take_metadata(&mut self) -> Option<StreamMetadata> {
        self.pending_metadata.take()
    }

    pub fn reader_failed(&self) -> bool {
        self.reader.failed()
    }
}
