//! Playback driver, tick cadence, and driver lifecycle state.

pub mod driver;
pub mod state;
pub mod ticker;

pub use driver::PlaybackDriver;
pub use state::DriverState;
pub use ticker::Ticker;
