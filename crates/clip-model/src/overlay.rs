//! Text overlay style attached to a clip.

use serde::{Deserialize, Serialize};

/// Vertical anchor of the overlay text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    Top,
    #[default]
    Center,
    Bottom,
}

/// Styled, possibly multi-line text drawn over every frame of a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOverlay {
    pub content: String,
    pub position: OverlayPosition,

    /// Font size in pixels.
    pub font_size: f64,

    /// Hex colors (`#rrggbb` or `#rgb`).
    pub text_color: String,
    pub bg_color: String,

    /// Background opacity in percent, `0` disables the background box.
    pub bg_opacity: f64,

    /// CSS-style weight ("400", "700", "bold").
    pub font_weight: String,
}

impl Default for TextOverlay {
    fn default() -> Self {
        Self {
            content: String::new(),
            position: OverlayPosition::Center,
            font_size: 48.0,
            text_color: "#ffffff".to_string(),
            bg_color: "#000000".to_string(),
            bg_opacity: 50.0,
            font_weight: "700".to_string(),
        }
    }
}

impl TextOverlay {
    /// Overlay with default styling, or `None` when the trimmed content is
    /// empty (an empty overlay means "no overlay").
    pub fn from_content(content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            content: content.to_string(),
            ..Self::default()
        })
    }

    pub fn with_position(mut self, position: OverlayPosition) -> Self {
        self.position = position;
        self
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.split('\n')
    }

    pub fn line_count(&self) -> usize {
        self.lines().count()
    }

    /// Background alpha in `[0, 1]`.
    pub fn bg_alpha(&self) -> f64 {
        (self.bg_opacity / 100.0).clamp(0.0, 1.0)
    }

    /// Numeric weight, `bold` = 700 and `normal` = 400.
    pub fn numeric_weight(&self) -> u16 {
        match self.font_weight.trim() {
            "bold" | "bolder" => 700,
            "normal" | "" => 400,
            "lighter" => 300,
            other => other.parse().unwrap_or(400),
        }
    }
}

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    /// Parse `#rrggbb`, `rrggbb`, `#rgb` or `rgb` (case-insensitive).
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            6 => Some(Self {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            3 => {
                let expand = |s: &str| channel(s).map(|v| v * 17);
                Some(Self {
                    r: expand(&hex[0..1])?,
                    g: expand(&hex[1..2])?,
                    b: expand(&hex[2..3])?,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_defaults() {
        let overlay = TextOverlay::from_content("  Hello\nWorld \n").unwrap();
        assert_eq!(overlay.content, "Hello\nWorld");
        assert_eq!(overlay.position, OverlayPosition::Center);
        assert_eq!(overlay.font_size, 48.0);
        assert_eq!(overlay.text_color, "#ffffff");
        assert_eq!(overlay.bg_color, "#000000");
        assert_eq!(overlay.bg_opacity, 50.0);
        assert_eq!(overlay.numeric_weight(), 700);
        assert_eq!(overlay.line_count(), 2);
    }

    #[test]
    fn test_empty_content_means_no_overlay() {
        assert!(TextOverlay::from_content("").is_none());
        assert!(TextOverlay::from_content(" \n\t ").is_none());
    }

    #[test]
    fn test_bg_alpha_clamps() {
        let mut overlay = TextOverlay::default();
        overlay.bg_opacity = 150.0;
        assert_eq!(overlay.bg_alpha(), 1.0);
        overlay.bg_opacity = -5.0;
        assert_eq!(overlay.bg_alpha(), 0.0);
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(
            Rgb::from_hex("#ff8000"),
            Some(Rgb {
                r: 255,
                g: 128,
                b: 0
            })
        );
        assert_eq!(Rgb::from_hex("FFF"), Some(Rgb::WHITE));
        assert_eq!(Rgb::from_hex("#000"), Some(Rgb::BLACK));
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("red"), None);
        assert_eq!(Rgb::from_hex("#gg0000"), None);
    }

    #[test]
    fn test_position_serde() {
        let json = serde_json::to_string(&OverlayPosition::Bottom).unwrap();
        assert_eq!(json, "\"bottom\"");
        let overlay: TextOverlay =
            serde_json::from_str(r#"{"content": "Hi", "position": "top"}"#).unwrap();
        assert_eq!(overlay.position, OverlayPosition::Top);
        assert_eq!(overlay.font_size, 48.0);
    }
}
