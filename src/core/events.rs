//! Player events emitted toward the scripting/event collaborator.
//!
//! The pipeline's only obligation is to emit these at the right
//! transitions, in order, exactly once each; payloads beyond the
//! metadata record are collaborator-defined.

use crate::container::StreamMetadata;
use crossbeam::channel::Sender;

/// Discrete events produced by the playback pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The byte source began receiving data.
    Open,
    /// A download or parse failure terminated playback.
    IoError(String),
    /// Parsed container metadata, reported once per stream.
    Metadata(StreamMetadata),
    /// First decoded frames are available.
    PlayStart,
    /// The decode-side buffers filled for the first time.
    BufferFull,
    /// Playback stopped (end of stream or close).
    PlayStop,
    /// Both decoders finished draining.
    BufferFlush,
    /// The stream played to its natural end.
    Complete,
}

/// Sink for player events.
///
/// Implemented by the host's scripting/event layer. Dispatch must not
/// block for long: it is called from pipeline worker threads.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: PlayerEvent);
}

/// Sink that discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _event: PlayerEvent) {}
}

/// Sink that forwards events over a crossbeam channel, for hosts that
/// service events on their own thread.
pub struct ChannelSink {
    tx: Sender<PlayerEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<PlayerEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn dispatch(&self, event: PlayerEvent) {
        // A disconnected receiver means the host went away; drop the event.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (tx, rx) = channel::unbounded();
        let sink = ChannelSink::new(tx);

        sink.dispatch(PlayerEvent::Open);
        sink.dispatch(PlayerEvent::PlayStart);
        sink.dispatch(PlayerEvent::PlayStop);

        assert_eq!(rx.recv().unwrap(), PlayerEvent::Open);
        assert_eq!(rx.recv().unwrap(), PlayerEvent::PlayStart);
        assert_eq!(rx.recv().unwrap(), PlayerEvent::PlayStop);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = channel::unbounded();
        let sink = ChannelSink::new(tx);
        drop(rx);
        sink.dispatch(PlayerEvent::Open);
    }
}
