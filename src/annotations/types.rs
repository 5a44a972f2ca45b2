//! Highlight and bookmark types
//!
//! The remote store owns these records; the engine keeps a cached copy and
//! draws highlights as renderer markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::LocationId;

/// A stored highlight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    /// Drawable region; unique across the highlight list
    pub document_range: LocationId,
    /// The highlighted passage
    pub text: String,
    pub color_name: String,
    pub color_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Highlight {
    pub fn color(&self) -> HighlightColor {
        HighlightColor::from_parts(&self.color_name, &self.color_hex)
    }

    pub fn marker_style(&self) -> MarkerStyle {
        MarkerStyle::solid(&self.color_hex)
    }
}

/// A stored bookmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub page_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Highlight palette
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
    Custom { name: String, hex: String },
}

impl HighlightColor {
    pub fn name(&self) -> &str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Pink => "pink",
            HighlightColor::Purple => "purple",
            HighlightColor::Custom { name, .. } => name,
        }
    }

    pub fn hex(&self) -> &str {
        match self {
            HighlightColor::Yellow => "#ffeb3b",
            HighlightColor::Green => "#a5d6a7",
            HighlightColor::Blue => "#90caf9",
            HighlightColor::Pink => "#f48fb1",
            HighlightColor::Purple => "#ce93d8",
            HighlightColor::Custom { hex, .. } => hex,
        }
    }

    /// Rebuild a color from stored name and hex, preferring the palette entry
    pub fn from_parts(name: &str, hex: &str) -> Self {
        let named = match name {
            "yellow" => HighlightColor::Yellow,
            "green" => HighlightColor::Green,
            "blue" => HighlightColor::Blue,
            "pink" => HighlightColor::Pink,
            "purple" => HighlightColor::Purple,
            _ => {
                return HighlightColor::Custom {
                    name: name.to_string(),
                    hex: hex.to_string(),
                }
            }
        };
        if named.hex().eq_ignore_ascii_case(hex) {
            named
        } else {
            HighlightColor::Custom {
                name: name.to_string(),
                hex: hex.to_string(),
            }
        }
    }
}

/// A text selection waiting for a color choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSelection {
    pub text: String,
    pub document_range: LocationId,
    /// Where the color picker should anchor, in viewport pixels
    pub anchor_x: f32,
    pub anchor_y: f32,
    pub anchor_height: f32,
}

/// Kinds of overlay markers the engine draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerKind {
    Highlight,
    SearchHit,
}

/// Fill used when drawing a marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerStyle {
    /// CSS color value
    pub fill: String,
    /// Opacity (0.0-1.0)
    pub opacity: f32,
}

impl MarkerStyle {
    pub fn solid(fill: &str) -> Self {
        Self {
            fill: fill.to_string(),
            opacity: 1.0,
        }
    }

    pub fn search_hit() -> Self {
        Self::solid("#ffa726")
    }
}

/// Create highlight request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHighlight {
    pub document_range: LocationId,
    pub text: String,
    pub color_name: String,
    pub color_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// Update highlight request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_hex: Option<String>,
    /// `Some(None)` clears the note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
}

/// Create bookmark request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBookmark {
    pub page_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Update bookmark request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_round_trips_through_parts() {
        let color = HighlightColor::from_parts("green", "#A5D6A7");
        assert_eq!(color, HighlightColor::Green);

        let custom = HighlightColor::from_parts("green", "#00ff00");
        assert_eq!(custom.hex(), "#00ff00");
        assert_eq!(custom.name(), "green");
    }

    #[test]
    fn test_highlight_serializes_camel_case() {
        let now = Utc::now();
        let highlight = Highlight {
            id: "h1".to_string(),
            document_range: LocationId::new("epubcfi(/6/2!/4,/1:0,/1:4)"),
            text: "Call".to_string(),
            color_name: "yellow".to_string(),
            color_hex: "#ffeb3b".to_string(),
            note: None,
            page_number: Some(1),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&highlight).unwrap();
        assert!(json.contains("\"documentRange\":\"epubcfi(/6/2!/4,/1:0,/1:4)\""));
        assert!(json.contains("\"colorHex\""));
        assert!(!json.contains("\"note\""));
        assert_eq!(highlight.marker_style(), MarkerStyle::solid("#ffeb3b"));
    }
}
