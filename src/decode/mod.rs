//! Per-track decoders and the codec seam.

pub mod audio;
pub mod codec;
pub mod video;

pub use audio::{AudioDecoder, AUDIO_QUEUE_CAPACITY};
pub use codec::{
    AudioChunk, AudioCodec, AudioParams, BuiltinCodecs, CodecError, CodecProvider, LinearPcmCodec,
    RawVideoCodec, VideoCodec, VideoFrame,
};
pub use video::{VideoDecoder, VIDEO_QUEUE_CAPACITY};

/// Decoder lifecycle. `Valid` is the only state in which frames may be
/// handed to a consumer; `Flushed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    PreInit,
    Init,
    Valid,
    Flushed,
}
