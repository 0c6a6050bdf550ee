//! Compositing surface: decoded frame plus overlay on an opaque canvas.

use clipreel_common::config::ExportDefaults;
use clipreel_media_core::element::VideoFrame;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::overlay::OverlayLayer;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Default surface size when no source dimensions are known.
pub fn default_surface_size() -> (u32, u32) {
    let defaults = ExportDefaults::default();
    (defaults.surface_width, defaults.surface_height)
}

/// The canvas every frame is drawn onto before display or encoding.
#[derive(Debug, Clone)]
pub struct CompositingSurface {
    canvas: RgbaImage,
}

impl CompositingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(width.max(1), height.max(1), BLACK),
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    /// Resize to exactly the source's native size. Returns whether the size
    /// changed.
    pub fn match_source(&mut self, width: u32, height: u32) -> bool {
        let target = (width.max(1), height.max(1));
        if target == self.dimensions() {
            return false;
        }
        tracing::debug!(width = target.0, height = target.1, "Surface matched to source");
        self.canvas = RgbaImage::from_pixel(target.0, target.1, BLACK);
        true
    }

    /// Grow to at least `width` x `height`; never shrinks.
    pub fn grow_to(&mut self, width: u32, height: u32) -> bool {
        let (w, h) = self.dimensions();
        let target = (w.max(width), h.max(height));
        if target == (w, h) {
            return false;
        }
        tracing::debug!(width = target.0, height = target.1, "Surface grown");
        self.canvas = RgbaImage::from_pixel(target.0, target.1, BLACK);
        true
    }

    /// Clear to black, draw `frame` scaled to the surface, then the overlay.
    pub fn compose(&mut self, frame: Option<&VideoFrame>, overlay: Option<&mut OverlayLayer>) -> &RgbaImage {
        self.clear();
        if let Some(frame) = frame {
            self.draw_frame(&frame.image);
        }
        if let Some(layer) = overlay {
            layer.paint_onto(&mut self.canvas);
        }
        &self.canvas
    }

    pub fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = BLACK;
        }
    }

    fn draw_frame(&mut self, frame: &RgbaImage) {
        let (w, h) = self.dimensions();
        if frame.dimensions() == (w, h) {
            imageops::overlay(&mut self.canvas, frame, 0, 0);
        } else if frame.width() > 0 && frame.height() > 0 {
            let scaled = imageops::resize(frame, w, h, FilterType::Triangle);
            imageops::overlay(&mut self.canvas, &scaled, 0, 0);
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }
}

impl Default for CompositingSurface {
    fn default() -> Self {
        let (width, height) = default_surface_size();
        Self::new(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipreel_clip_model::{OverlayPosition, TextOverlay};

    fn frame(width: u32, height: u32, color: [u8; 4]) -> VideoFrame {
        VideoFrame::new(RgbaImage::from_pixel(width, height, Rgba(color)), 0.0)
    }

    #[test]
    fn test_default_is_720p() {
        assert_eq!(CompositingSurface::default().dimensions(), (1280, 720));
    }

    #[test]
    fn test_compose_without_frame_is_black() {
        let mut surface = CompositingSurface::new(8, 8);
        let out = surface.compose(None, None);
        assert!(out.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn test_frame_is_scaled_to_surface() {
        let mut surface = CompositingSurface::new(64, 32);
        let out = surface.compose(Some(&frame(16, 8, [200, 10, 10, 255])), None);
        assert_eq!(out.dimensions(), (64, 32));
        for (x, y) in [(0, 0), (63, 31), (32, 16)] {
            let p = out.get_pixel(x, y);
            assert!(p[0] >= 198 && p[1] <= 12 && p[3] == 255, "pixel {x},{y} = {p:?}");
        }
    }

    #[test]
    fn test_previous_frame_does_not_bleed_through() {
        let mut surface = CompositingSurface::new(4, 4);
        surface.compose(Some(&frame(4, 4, [255, 255, 255, 255])), None);
        let out = surface.compose(Some(&frame(4, 4, [255, 255, 255, 0])), None);
        assert_eq!(*out.get_pixel(1, 1), BLACK);
    }

    #[test]
    fn test_grow_never_shrinks() {
        let mut surface = CompositingSurface::new(640, 480);
        assert!(surface.grow_to(1280, 360));
        assert_eq!(surface.dimensions(), (1280, 480));
        assert!(!surface.grow_to(320, 240));
        assert_eq!(surface.dimensions(), (1280, 480));
    }

    #[test]
    fn test_match_source_follows_both_ways() {
        let mut surface = CompositingSurface::new(640, 480);
        assert!(surface.match_source(320, 240));
        assert_eq!(surface.dimensions(), (320, 240));
        assert!(!surface.match_source(320, 240));
    }

    #[test]
    fn test_overlay_background_darkens_frame() {
        let mut surface = CompositingSurface::new(400, 200);
        let overlay = TextOverlay::from_content("caption")
            .unwrap()
            .with_position(OverlayPosition::Center);
        let mut layer = OverlayLayer::new(overlay, None);
        let out = surface.compose(Some(&frame(400, 200, [255, 255, 255, 255])), Some(&mut layer));
        let centre = out.get_pixel(200, 100);
        assert!(centre[0] < 200);
        assert_eq!(*out.get_pixel(2, 2), Rgba([255, 255, 255, 255]));
    }
}
