//! Display option types

use serde::{Deserialize, Serialize};

pub const MIN_FONT_SIZE: u16 = 50;
pub const MAX_FONT_SIZE: u16 = 200;
pub const FONT_SIZE_STEP: u16 = 10;

/// Line height bounds, in tenths
pub const MIN_LINE_HEIGHT: u8 = 10;
pub const MAX_LINE_HEIGHT: u8 = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontFamily {
    /// The publisher's own typeface
    #[default]
    Original,
    SansSerif,
}

impl FontFamily {
    pub fn toggled(self) -> Self {
        match self {
            FontFamily::Original => FontFamily::SansSerif,
            FontFamily::SansSerif => FontFamily::Original,
        }
    }
}

/// Color theme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Theme {
    #[default]
    None,
    Sepia,
    Dark,
    Custom { background: String, foreground: String },
}

impl Theme {
    /// Background and foreground colors, if the theme overrides the book's
    pub fn colors(&self) -> Option<(&str, &str)> {
        match self {
            Theme::None => None,
            Theme::Sepia => Some(("#f4ecd8", "#5b4636")),
            Theme::Dark => Some(("#121212", "#e0e0e0")),
            Theme::Custom {
                background,
                foreground,
            } => Some((background, foreground)),
        }
    }
}

/// Everything the renderer's styling hooks receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStyle {
    /// Percent of the book's base size
    pub font_size: u16,
    pub font_family: FontFamily,
    /// Tenths: 15 means 1.5
    pub line_height: u8,
    /// Degrees, one of 0, 90, 180, 270
    pub rotation: u16,
    pub theme: Theme,
}

impl Default for DisplayStyle {
    fn default() -> Self {
        Self {
            font_size: 100,
            font_family: FontFamily::Original,
            line_height: 15,
            rotation: 0,
            theme: Theme::None,
        }
    }
}

impl DisplayStyle {
    pub fn line_height_value(&self) -> f32 {
        f32::from(self.line_height) / 10.0
    }
}

/// Clamp into [50, 200] and snap to the nearest multiple of 10.
pub fn normalize_font_size(size: u16) -> u16 {
    let clamped = size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    (clamped + FONT_SIZE_STEP / 2) / FONT_SIZE_STEP * FONT_SIZE_STEP
}

/// Convert a line height value to clamped tenths.
pub fn line_height_tenths(value: f32) -> u8 {
    if !value.is_finite() {
        return DisplayStyle::default().line_height;
    }
    let tenths = (value * 10.0).round().clamp(f32::from(MIN_LINE_HEIGHT), f32::from(MAX_LINE_HEIGHT));
    tenths as u8
}

/// Snap to a multiple of 90 in [0, 360).
pub fn normalize_rotation(degrees: u16) -> u16 {
    (degrees / 90 * 90) % 360
}
