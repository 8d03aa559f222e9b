//! Config sections and their defaults.

use serde::{Deserialize, Serialize};

/// Where the Hyperion LED server listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperionConfig {
    pub address: String,
    /// Port of the binary protobuf listener (image streams).
    pub proto_port: u16,
    /// Port of the JSON listener (color commands).
    pub json_port: u16,
}

impl Default for HyperionConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            proto_port: 19445,
            json_port: 19444,
        }
    }
}

/// Screen capture worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Start the capture worker enabled.
    pub enabled: bool,
    pub frame_rate: u32,
    pub scale_width: u32,
    pub scale_height: u32,
    /// Hyperion channel priority for capture frames.
    pub priority: i64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frame_rate: 30,
            scale_width: 64,
            scale_height: 64,
            priority: 100,
        }
    }
}

/// Audio effect worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Start the audio worker enabled.
    pub enabled: bool,
    pub frame_rate: u32,
    /// Hyperion channel priority for audio effects.
    pub priority: i64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_rate: 30,
            priority: 128,
        }
    }
}

/// Physical LED frame geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub count_top: u32,
    pub count_bottom: u32,
    pub count_side: u32,
    pub start_corner: LedCorner,
    pub direction: LedDirection,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count_top: 20,
            count_bottom: 20,
            count_side: 12,
            start_corner: LedCorner::BottomLeft,
            direction: LedDirection::Clockwise,
        }
    }
}

/// Which corner of the frame LED index 0 sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl LedCorner {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedCorner::TopLeft => "top_left",
            LedCorner::TopRight => "top_right",
            LedCorner::BottomLeft => "bottom_left",
            LedCorner::BottomRight => "bottom_right",
        }
    }
}

/// Direction the strip runs from the start corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedDirection {
    Clockwise,
    CounterClockwise,
}

impl LedDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedDirection::Clockwise => "clockwise",
            LedDirection::CounterClockwise => "counter_clockwise",
        }
    }
}

/// Logging defaults for the daemon and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `lanternproto=debug`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
