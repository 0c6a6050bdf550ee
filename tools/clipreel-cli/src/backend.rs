//! Media backend selection.

use std::sync::Arc;

use clipreel_media_core::backend::MediaBackend;

/// The backend compiled into this binary.
#[cfg(feature = "gst")]
pub fn media_backend() -> anyhow::Result<Arc<dyn MediaBackend>> {
    let backend = clipreel_media_gst::GstBackend::new();
    if !backend.is_available() {
        anyhow::bail!("GStreamer could not be initialised; is it installed?");
    }
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gst"))]
pub fn media_backend() -> anyhow::Result<Arc<dyn MediaBackend>> {
    anyhow::bail!(
        "This build has no media backend. Rebuild with `--features gst` to preview or export."
    )
}
