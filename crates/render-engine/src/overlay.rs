//! Text overlay layout and rasterisation.
//!
//! Layout is a pure function from a [`TextOverlay`] and surface size to a
//! list of [`DrawCommand`]s, so identical input always yields identical
//! output. Rasterisation is separate: [`paint`] applies commands to an RGBA
//! image, blending backgrounds and glyph coverage over what is already there.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clipreel_clip_model::{OverlayPosition, Rgb, TextOverlay};
use clipreel_common::error::{ClipreelError, ClipreelResult};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, Blend};
use imageproc::rect::Rect;
use rusttype::{point, Font, PositionedGlyph, Scale};

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// Distance between a top/bottom anchored block and the surface edge.
pub const EDGE_MARGIN: f64 = 40.0;

/// Background padding around each line.
pub const BACKGROUND_PAD_X: f64 = 20.0;
pub const BACKGROUND_PAD_Y: f64 = 10.0;

/// Font request attached to a text command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontSpec {
    pub size: f64,
    pub weight: u16,
}

impl FontSpec {
    pub fn is_bold(&self) -> bool {
        self.weight >= 600
    }
}

/// One drawing primitive. Text is horizontally centred on `x` with its
/// vertical middle on `y`.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: Rgb,
        alpha: f64,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
        color: Rgb,
        font: FontSpec,
    },
}

/// Measures rendered text width.
pub trait TextMeasurer {
    fn measure(&self, text: &str, font: &FontSpec) -> f64;
}

/// Fixed-advance metrics for layout without a font file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateMetrics;

impl TextMeasurer for ApproximateMetrics {
    fn measure(&self, text: &str, font: &FontSpec) -> f64 {
        let glyph_advance = if font.is_bold() { 0.6 } else { 0.55 };
        text.chars()
            .map(|c| {
                if c.is_whitespace() {
                    0.28
                } else if c.is_ascii_punctuation() {
                    0.35
                } else {
                    glyph_advance
                }
            })
            .sum::<f64>()
            * font.size
    }
}

/// Lay out `overlay` on a `width` x `height` surface.
pub fn layout_overlay(
    overlay: &TextOverlay,
    width: u32,
    height: u32,
    measurer: &dyn TextMeasurer,
) -> Vec<DrawCommand> {
    let lines: Vec<&str> = overlay.lines().collect();
    if overlay.content.is_empty() || lines.is_empty() {
        return Vec::new();
    }

    let width = width as f64;
    let height = height as f64;
    let font = FontSpec {
        size: overlay.font_size,
        weight: overlay.numeric_weight(),
    };
    let line_height = font.size * LINE_HEIGHT_FACTOR;
    let block_height = lines.len() as f64 * line_height;

    let start_y = match overlay.position {
        OverlayPosition::Top => block_height / 2.0 + EDGE_MARGIN,
        OverlayPosition::Bottom => height - block_height / 2.0 - EDGE_MARGIN,
        OverlayPosition::Center => height / 2.0,
    };

    let text_color = Rgb::from_hex(&overlay.text_color).unwrap_or(Rgb::WHITE);
    let background = Rgb::from_hex(&overlay.bg_color).filter(|_| overlay.bg_alpha() > 0.0);
    let centre_x = width / 2.0;
    let middle = (lines.len() as f64 - 1.0) / 2.0;

    let mut commands = Vec::with_capacity(lines.len() * 2);
    for (i, line) in lines.iter().enumerate() {
        let y = start_y + (i as f64 - middle) * line_height;

        if let Some(color) = background {
            let text_width = measurer.measure(line, &font);
            commands.push(DrawCommand::FillRect {
                x: centre_x - text_width / 2.0 - BACKGROUND_PAD_X,
                y: y - font.size / 2.0 - BACKGROUND_PAD_Y,
                width: text_width + BACKGROUND_PAD_X * 2.0,
                height: line_height,
                color,
                alpha: overlay.bg_alpha(),
            });
        }

        commands.push(DrawCommand::FillText {
            text: (*line).to_string(),
            x: centre_x,
            y,
            color: text_color,
            font,
        });
    }
    commands
}

/// A TrueType/OpenType font for glyph rendering.
#[derive(Clone)]
pub struct OverlayFont {
    font: Font<'static>,
}

impl std::fmt::Debug for OverlayFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayFont")
            .field("glyphs", &self.font.glyph_count())
            .finish()
    }
}

impl OverlayFont {
    pub fn from_bytes(data: Vec<u8>) -> ClipreelResult<Self> {
        Font::try_from_vec(data)
            .map(|font| Self { font })
            .ok_or_else(|| ClipreelError::render("Unsupported or corrupt font data"))
    }

    pub fn load(path: &Path) -> ClipreelResult<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read font {}", path.display()))?;
        Self::from_bytes(data)
    }

    fn glyphs(&self, text: &str, size: f64) -> Vec<PositionedGlyph<'static>> {
        self.font
            .layout(text, Scale::uniform(size as f32), point(0.0, 0.0))
            .collect()
    }

    /// Offset from a line's vertical middle to its baseline.
    fn middle_to_baseline(&self, size: f64) -> f64 {
        let v = self.font.v_metrics(Scale::uniform(size as f32));
        (v.ascent + v.descent) as f64 / 2.0
    }
}

impl TextMeasurer for OverlayFont {
    fn measure(&self, text: &str, font: &FontSpec) -> f64 {
        let glyphs = self.glyphs(text, font.size);
        let Some(last) = glyphs.last() else {
            return 0.0;
        };
        let advance = last.unpositioned().h_metrics().advance_width;
        let bold_extra = if font.is_bold() { 1.0 } else { 0.0 };
        (last.position().x + advance) as f64 + bold_extra
    }
}

/// Apply draw commands to `image`. Text needs a font; without one only
/// backgrounds are drawn.
pub fn paint(image: &mut RgbaImage, commands: &[DrawCommand], font: Option<&OverlayFont>) {
    for command in commands {
        match command {
            DrawCommand::FillRect {
                x,
                y,
                width,
                height,
                color,
                alpha,
            } => fill_rect(image, *x, *y, *width, *height, *color, *alpha),
            DrawCommand::FillText {
                text,
                x,
                y,
                color,
                font: spec,
            } => {
                if let Some(font) = font {
                    fill_text(image, font, text, *x, *y, *color, spec);
                }
            }
        }
    }
}

fn fill_rect(image: &mut RgbaImage, x: f64, y: f64, width: f64, height: f64, color: Rgb, alpha: f64) {
    let (surface_w, surface_h) = image.dimensions();
    let left = x.round().max(0.0);
    let top = y.round().max(0.0);
    let right = (x + width).round().min(surface_w as f64);
    let bottom = (y + height).round().min(surface_h as f64);
    if right - left < 1.0 || bottom - top < 1.0 {
        return;
    }

    let rect = Rect::at(left as i32, top as i32).of_size((right - left) as u32, (bottom - top) as u32);
    let fill = Rgba([color.r, color.g, color.b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8]);

    let mut canvas = Blend(std::mem::take(image));
    draw_filled_rect_mut(&mut canvas, rect, fill);
    *image = canvas.0;
}

fn fill_text(
    image: &mut RgbaImage,
    font: &OverlayFont,
    text: &str,
    centre_x: f64,
    middle_y: f64,
    color: Rgb,
    spec: &FontSpec,
) {
    let width = font.measure(text, spec);
    let origin_x = centre_x - width / 2.0;
    let baseline = middle_y + font.middle_to_baseline(spec.size);
    let passes: &[f64] = if spec.is_bold() { &[0.0, 1.0] } else { &[0.0] };

    for glyph in font.glyphs(text, spec.size) {
        let Some(bounds) = glyph.pixel_bounding_box() else {
            continue;
        };
        for offset in passes {
            let base_x = origin_x + offset + bounds.min.x as f64;
            let base_y = baseline + bounds.min.y as f64;
            glyph.draw(|gx, gy, coverage| {
                let px = (base_x + gx as f64).round();
                let py = (base_y + gy as f64).round();
                if px < 0.0 || py < 0.0 {
                    return;
                }
                let (px, py) = (px as u32, py as u32);
                if px < image.width() && py < image.height() {
                    blend_over(image.get_pixel_mut(px, py), color, coverage);
                }
            });
        }
    }
}

/// Source-over blend of an opaque color at `coverage` onto `dst`.
fn blend_over(dst: &mut Rgba<u8>, color: Rgb, coverage: f32) {
    let a = coverage.clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }
    let mix = |d: u8, s: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u8;
    dst.0 = [
        mix(dst.0[0], color.r),
        mix(dst.0[1], color.g),
        mix(dst.0[2], color.b),
        (a * 255.0 + dst.0[3] as f32 * (1.0 - a)).round() as u8,
    ];
}

/// A text overlay bound to a font, with layout cached per surface size.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    overlay: TextOverlay,
    font: Option<Arc<OverlayFont>>,
    cached: Option<((u32, u32), Vec<DrawCommand>)>,
}

impl OverlayLayer {
    pub fn new(overlay: TextOverlay, font: Option<Arc<OverlayFont>>) -> Self {
        Self {
            overlay,
            font,
            cached: None,
        }
    }

    pub fn overlay(&self) -> &TextOverlay {
        &self.overlay
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Commands for a surface of the given size.
    pub fn commands(&mut self, width: u32, height: u32) -> &[DrawCommand] {
        let stale = !matches!(&self.cached, Some((size, _)) if *size == (width, height));
        if stale {
            let commands = match &self.font {
                Some(font) => layout_overlay(&self.overlay, width, height, font.as_ref()),
                None => layout_overlay(&self.overlay, width, height, &ApproximateMetrics),
            };
            self.cached = Some(((width, height), commands));
        }
        match &self.cached {
            Some((_, commands)) => commands,
            None => &[],
        }
    }

    pub fn paint_onto(&mut self, image: &mut RgbaImage) {
        let (width, height) = image.dimensions();
        let font = self.font.clone();
        let commands = self.commands(width, height).to_vec();
        paint(image, &commands, font.as_deref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(content: &str, position: OverlayPosition) -> TextOverlay {
        TextOverlay::from_content(content)
            .unwrap()
            .with_position(position)
    }

    fn text_ys(commands: &[DrawCommand]) -> Vec<f64> {
        commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::FillText { y, .. } => Some(*y),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_center_single_line() {
        let o = overlay("Hello", OverlayPosition::Center);
        let commands = layout_overlay(&o, 1280, 720, &ApproximateMetrics);
        assert_eq!(commands.len(), 2);
        assert_eq!(text_ys(&commands), vec![360.0]);
        match &commands[1] {
            DrawCommand::FillText { x, text, .. } => {
                assert_eq!(*x, 640.0);
                assert_eq!(text, "Hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_top_and_bottom_anchors() {
        // font 48 -> line height 57.6, two lines -> block 115.2
        let top = layout_overlay(
            &overlay("a\nb", OverlayPosition::Top),
            1280,
            720,
            &ApproximateMetrics,
        );
        let ys = text_ys(&top);
        assert!((ys[0] - (57.6 + 40.0 - 28.8)).abs() < 1e-9);
        assert!((ys[1] - (57.6 + 40.0 + 28.8)).abs() < 1e-9);

        let bottom = layout_overlay(
            &overlay("a\nb", OverlayPosition::Bottom),
            1280,
            720,
            &ApproximateMetrics,
        );
        let ys = text_ys(&bottom);
        assert!((ys[1] - (720.0 - 57.6 - 40.0 + 28.8)).abs() < 1e-9);
    }

    #[test]
    fn test_background_rect_geometry() {
        let o = overlay("abcd", OverlayPosition::Center);
        let font = FontSpec {
            size: 48.0,
            weight: 700,
        };
        let text_width = ApproximateMetrics.measure("abcd", &font);
        let commands = layout_overlay(&o, 1000, 500, &ApproximateMetrics);
        match &commands[0] {
            DrawCommand::FillRect {
                x,
                y,
                width,
                height,
                color,
                alpha,
            } => {
                assert!((x - (500.0 - text_width / 2.0 - 20.0)).abs() < 1e-9);
                assert!((y - (250.0 - 24.0 - 10.0)).abs() < 1e-9);
                assert!((width - (text_width + 40.0)).abs() < 1e-9);
                assert!((height - 57.6).abs() < 1e-9);
                assert_eq!(*color, Rgb::BLACK);
                assert!((alpha - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_background_when_transparent_or_unparseable() {
        let mut o = overlay("x", OverlayPosition::Center);
        o.bg_opacity = 0.0;
        assert_eq!(layout_overlay(&o, 100, 100, &ApproximateMetrics).len(), 1);

        o.bg_opacity = 80.0;
        o.bg_color = "not-a-color".into();
        assert_eq!(layout_overlay(&o, 100, 100, &ApproximateMetrics).len(), 1);
    }

    #[test]
    fn test_bad_text_color_falls_back_to_white() {
        let mut o = overlay("x", OverlayPosition::Center);
        o.text_color = "#zzz".into();
        let commands = layout_overlay(&o, 100, 100, &ApproximateMetrics);
        assert!(commands
            .iter()
            .any(|c| matches!(c, DrawCommand::FillText { color, .. } if *color == Rgb::WHITE)));
    }

    #[test]
    fn test_layout_is_deterministic() {
        let o = overlay("line one\nline two\nthree", OverlayPosition::Bottom);
        let a = layout_overlay(&o, 1920, 1080, &ApproximateMetrics);
        let b = layout_overlay(&o, 1920, 1080, &ApproximateMetrics);
        assert_eq!(a, b);
    }

    #[test]
    fn test_paint_background_blends() {
        let mut image = RgbaImage::from_pixel(200, 100, Rgba([255, 255, 255, 255]));
        let commands = vec![DrawCommand::FillRect {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
            color: Rgb::BLACK,
            alpha: 0.5,
        }];
        paint(&mut image, &commands, None);
        let inside = image.get_pixel(20, 20);
        assert!(inside[0] > 100 && inside[0] < 150);
        assert_eq!(*image.get_pixel(100, 80), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_paint_clips_offscreen_rect() {
        let mut image = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let commands = vec![DrawCommand::FillRect {
            x: -50.0,
            y: -50.0,
            width: 10.0,
            height: 10.0,
            color: Rgb::WHITE,
            alpha: 1.0,
        }];
        paint(&mut image, &commands, None);
        assert!(image.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn test_layer_caches_by_size() {
        let mut layer = OverlayLayer::new(overlay("hi", OverlayPosition::Top), None);
        let first = layer.commands(640, 360).to_vec();
        assert_eq!(layer.commands(640, 360), first.as_slice());
        assert_ne!(layer.commands(1280, 720), first.as_slice());
    }

    #[test]
    fn test_font_rejects_garbage() {
        assert!(OverlayFont::from_bytes(vec![0, 1, 2, 3]).is_err());
    }
}
