//! Immutable settings snapshots.
//!
//! The manager always sends the complete settings map; workers never patch
//! their copy field by field. Each worker's setting units pick out the keys
//! they bound and ignore the rest.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical setting keys shared by the manager and the workers.
pub mod keys {
    pub const HYPERION_ADDRESS: &str = "hyperion.address";
    pub const HYPERION_PROTO_PORT: &str = "hyperion.proto_port";
    pub const HYPERION_JSON_PORT: &str = "hyperion.json_port";

    pub const CAPTURE_FRAME_RATE: &str = "capture.frame_rate";
    pub const CAPTURE_SCALE_WIDTH: &str = "capture.scale_width";
    pub const CAPTURE_SCALE_HEIGHT: &str = "capture.scale_height";
    pub const CAPTURE_PRIORITY: &str = "capture.priority";

    pub const AUDIO_FRAME_RATE: &str = "audio.frame_rate";
    pub const AUDIO_PRIORITY: &str = "audio.priority";

    pub const LED_COUNT_TOP: &str = "leds.count_top";
    pub const LED_COUNT_BOTTOM: &str = "leds.count_bottom";
    pub const LED_COUNT_SIDE: &str = "leds.count_side";
    pub const LED_START_CORNER: &str = "leds.start_corner";
    pub const LED_DIRECTION: &str = "leds.direction";
}

/// Errors from typed setting reads.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("setting {key:?} is not present")]
    Missing { key: String },

    #[error("setting {key:?} has the wrong type: {source}")]
    WrongType {
        key: String,
        source: serde_json::Error,
    },
}

/// A flat, immutable `key -> value` map.
///
/// Snapshots are created by the manager and sent wholesale on every
/// SETTINGS message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot(BTreeMap<String, serde_json::Value>);

impl SettingsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Typed read; the error distinguishes a missing key from a value of
    /// the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, SettingsError> {
        let value = self.0.get(key).ok_or_else(|| SettingsError::Missing {
            key: key.to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| SettingsError::WrongType {
            key: key.to_string(),
            source: e,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for SettingsSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
