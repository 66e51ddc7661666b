//! strix: streaming media acquisition and decode pipeline.
//!
//! Turns a remote or local byte stream into time-ordered decoded
//! audio/video frames ready for synchronized playback. A byte producer
//! pushes data into a [`source::ByteSource`]; a worker-pool job demuxes
//! the container and feeds per-track decoders; a periodic tick drains
//! decoded frames against a clock driven by the audio device (or a
//! frame-rate fallback) and reports progress through an
//! [`core::EventSink`].
//!
//! Rendering, scripting and the network stack are the host's: this
//! crate only consumes their contracts at the seams (`EventSink`,
//! `AudioBackend`, `CodecProvider`, the `ByteSource` producer API).

pub mod audio;
pub mod buffer;
pub mod container;
pub mod core;
pub mod decode;
pub mod playback;
pub mod source;
pub mod worker;

pub use crate::audio::{AudioBackend, AudioError, AudioStream, NullBackend};
pub use crate::buffer::FrameQueue;
pub use crate::container::{ContainerError, Demuxer, StreamMetadata};
pub use crate::core::{ChannelSink, EventSink, NullSink, PlayerEvent, Time};
pub use crate::decode::{
    AudioCodec, AudioDecoder, BuiltinCodecs, CodecError, CodecProvider, DecoderState, VideoCodec,
    VideoDecoder, VideoFrame,
};
pub use crate::playback::{DriverState, PlaybackDriver};
pub use crate::source::{ByteSource, SourceError, SourceReader};
pub use crate::worker::{AbortToken, Job, JobHandle, WorkerPool};
