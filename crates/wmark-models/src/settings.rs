//! Watermark placement and scale settings.
//!
//! Both settings are closed enums. Raw values coming from the preference
//! store are resolved leniently: anything unknown or missing maps to the
//! default variant instead of an error.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Margin in pixels between the watermark and the frame edge.
pub const WATERMARK_MARGIN_PX: u32 = 5;

/// Anchor corner for the watermark overlay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl WatermarkPosition {
    /// All selectable positions, in menu order.
    pub const ALL: &'static [WatermarkPosition] = &[
        WatermarkPosition::TopLeft,
        WatermarkPosition::TopRight,
        WatermarkPosition::BottomLeft,
        WatermarkPosition::BottomRight,
    ];

    /// Resolve a stored raw value, falling back to the default.
    pub fn resolve(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }

    /// Stable identifier used for storage and callbacks.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkPosition::TopLeft => "top_left",
            WatermarkPosition::TopRight => "top_right",
            WatermarkPosition::BottomLeft => "bottom_left",
            WatermarkPosition::BottomRight => "bottom_right",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            WatermarkPosition::TopLeft => "Top Left",
            WatermarkPosition::TopRight => "Top Right",
            WatermarkPosition::BottomLeft => "Bottom Left",
            WatermarkPosition::BottomRight => "Bottom Right",
        }
    }

    /// FFmpeg `overlay` x:y expression for this corner.
    ///
    /// `main_w`/`main_h` are the base video dimensions and
    /// `overlay_w`/`overlay_h` the scaled watermark dimensions.
    pub fn overlay_expr(&self) -> String {
        let m = WATERMARK_MARGIN_PX;
        match self {
            WatermarkPosition::TopLeft => format!("{m}:{m}"),
            WatermarkPosition::TopRight => format!("main_w-overlay_w-{m}:{m}"),
            WatermarkPosition::BottomLeft => format!("{m}:main_h-overlay_h-{m}"),
            WatermarkPosition::BottomRight => {
                format!("main_w-overlay_w-{m}:main_h-overlay_h-{m}")
            }
        }
    }
}

impl fmt::Display for WatermarkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WatermarkPosition {
    type Err = SettingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "top_left" | "top-left" | "topleft" | "5:5" => Ok(WatermarkPosition::TopLeft),
            "top_right" | "top-right" | "topright" | "main_w-overlay_w-5:5" => {
                Ok(WatermarkPosition::TopRight)
            }
            // Older stores kept the bottom-left expression without the y margin.
            "bottom_left" | "bottom-left" | "bottomleft" | "5:main_h-overlay_h"
            | "5:main_h-overlay_h-5" => Ok(WatermarkPosition::BottomLeft),
            "bottom_right" | "bottom-right" | "bottomright"
            | "main_w-overlay_w-5:main_h-overlay_h-5" => Ok(WatermarkPosition::BottomRight),
            _ => Err(SettingParseError::Position(s.to_string())),
        }
    }
}

/// Watermark width as a percentage of the base video width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum WatermarkSize {
    Percent5,
    #[default]
    Percent7,
    Percent10,
    Percent15,
    Percent20,
    Percent25,
    Percent30,
    Percent35,
    Percent40,
    Percent45,
}

impl WatermarkSize {
    /// All selectable sizes, in menu order.
    pub const ALL: &'static [WatermarkSize] = &[
        WatermarkSize::Percent5,
        WatermarkSize::Percent7,
        WatermarkSize::Percent10,
        WatermarkSize::Percent15,
        WatermarkSize::Percent20,
        WatermarkSize::Percent25,
        WatermarkSize::Percent30,
        WatermarkSize::Percent35,
        WatermarkSize::Percent40,
        WatermarkSize::Percent45,
    ];

    /// Resolve a stored raw value, falling back to the default.
    pub fn resolve(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }

    pub fn percent(&self) -> u32 {
        match self {
            WatermarkSize::Percent5 => 5,
            WatermarkSize::Percent7 => 7,
            WatermarkSize::Percent10 => 10,
            WatermarkSize::Percent15 => 15,
            WatermarkSize::Percent20 => 20,
            WatermarkSize::Percent25 => 25,
            WatermarkSize::Percent30 => 30,
            WatermarkSize::Percent35 => 35,
            WatermarkSize::Percent40 => 40,
            WatermarkSize::Percent45 => 45,
        }
    }

    /// Human-readable label, e.g. `7%`.
    pub fn label(&self) -> String {
        format!("{}%", self.percent())
    }

    fn from_percent(percent: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.percent() == percent)
    }
}

impl fmt::Display for WatermarkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.percent())
    }
}

impl FromStr for WatermarkSize {
    type Err = SettingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_suffix('%').unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Self::from_percent)
            .ok_or_else(|| SettingParseError::Size(s.to_string()))
    }
}

impl TryFrom<String> for WatermarkSize {
    type Error = SettingParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WatermarkSize> for String {
    fn from(value: WatermarkSize) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingParseError {
    #[error("Unknown watermark position: {0}")]
    Position(String),
    #[error("Unknown watermark size: {0}")]
    Size(String),
}

/// Resolved per-user watermark settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct WatermarkSettings {
    #[serde(default)]
    pub position: WatermarkPosition,
    #[serde(default)]
    #[schemars(with = "String")]
    pub size: WatermarkSize,
}

impl WatermarkSettings {
    pub fn new(position: WatermarkPosition, size: WatermarkSize) -> Self {
        Self { position, size }
    }

    /// Resolve from raw preference values. Never fails.
    pub fn resolve(position: Option<&str>, size: Option<&str>) -> Self {
        Self {
            position: WatermarkPosition::resolve(position),
            size: WatermarkSize::resolve(size),
        }
    }
}
