//! Clipreel Common Utilities
//!
//! Shared infrastructure for all Clipreel crates:
//! - Error types and result aliases
//! - Frame clock and time conversions for the draw loop and encoder
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
