//! Clipreel Render Engine
//!
//! Turns decoded frames into output: overlay text, the compositing
//! surface, and the export capture pipeline that records a clip's segments
//! into a single encoded container.
//!
//! # Pipeline Architecture
//!
//! ```text
//! clip segments ──▶ resolve ──▶ decode element ──┬──▶ current frame ──┐
//!                                                │                    ├── CompositingSurface
//!                                text overlay ───┼────────────────────┘          │
//!                                                │                          DrawLoop (fps)
//!                                                ▼                               │
//!                                           audio graph ──▶ StreamEncoder ◀──────┘
//!                                                                  │
//!                                                                  ▼
//!                                                          ExportArtifact
//! ```

pub mod compositor;
pub mod draw_loop;
pub mod export;
pub mod overlay;
pub mod preview;

pub use compositor::*;
pub use draw_loop::*;
pub use export::*;
pub use overlay::*;
pub use preview::*;
