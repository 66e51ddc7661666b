pub mod events;
pub mod time;

pub use events::{ChannelSink, EventSink, NullSink, PlayerEvent};
pub use time::Time;
