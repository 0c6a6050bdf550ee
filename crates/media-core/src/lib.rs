//! Clipreel Media Core
//!
//! Contracts between the playback/export engine and the host media stack.
//! The engine never talks to a decoder or encoder directly; it drives these
//! traits, which the GStreamer backend (and the scripted test doubles)
//! implement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 MediaBackend                 │
//! │  ┌───────────────┐        ┌───────────────┐  │
//! │  │ DecodeElement │──────▶ │ StreamEncoder │  │
//! │  │  (events,     │ frames │  (video +     │  │
//! │  │   frames)     │ audio  │   audio)      │  │
//! │  └───────┬───────┘        └───────────────┘  │
//! │          │ AudioGraph → AudioTrack           │
//! └──────────┼───────────────────────────────────┘
//!            ▼
//!   wait::{ensure_source, seek_to, wait_for_position}
//! ```
//!
//! Waits are single-shot: each subscribes to the element's event stream
//! before acting, resolves once, and drops its subscription on every exit.

pub mod abort;
pub mod audio;
pub mod backend;
pub mod capability;
pub mod element;
pub mod encoder;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use abort::*;
pub use audio::*;
pub use backend::*;
pub use capability::*;
pub use element::*;
pub use encoder::*;
