//! Clipreel Clip Model
//!
//! Defines the data contracts the playback and export engine consumes:
//! - **Sources:** Decodable media inputs and the registry that owns them
//! - **Segments:** `[start, end)` time ranges bound to one source
//! - **Clips:** Ordered segment lists with an optional text overlay
//! - **Project:** The on-disk container for sources and authored clips
//!
//! All times are in seconds. The engine only reads these types; producers
//! (the editor, the CLI) are responsible for keeping clip durations honest.

pub mod clip;
pub mod overlay;
pub mod project;
pub mod segment;
pub mod source;

pub use clip::*;
pub use overlay::*;
pub use project::*;
pub use segment::*;
pub use source::*;
