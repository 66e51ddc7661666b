//! Tag-based container reading: header/tag records, script-data
//! metadata, and the demuxer state machine.

pub mod demuxer;
pub mod metadata;
pub mod tag;

pub use demuxer::Demuxer;
pub use metadata::{parse_script_data, StreamMetadata};
pub use tag::{
    AudioTagHeader, ContainerError, StreamHeader, TagHeader, TagKind, VideoTagHeader, HEADER_LEN,
    TAG_HEADER_LEN,
};
