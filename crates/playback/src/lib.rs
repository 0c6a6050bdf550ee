//! Clipreel Playback
//!
//! Plays an ordered, possibly multi-source clip on a single decode element
//! as if it were one continuous stream.
//!
//! - [`PlaybackSequencer`] is a synchronous state machine fed with media
//!   events; it owns the playback cursor and performs cross-source handoff.
//! - [`PreviewSession`] drives a sequencer from the element's event stream
//!   on a tokio task and publishes its status for a UI.

pub mod preview;
pub mod sequencer;

pub use preview::*;
pub use sequencer::*;
