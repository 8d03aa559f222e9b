//! Minimal configuration loading for lantern.
//!
//! One TOML file describes the whole installation: where the Hyperion
//! server lives, how the capture and audio workers should pace themselves,
//! and the LED frame geometry. The manager loads it once, flattens it into
//! a settings snapshot, and pushes that snapshot to every worker; workers
//! never read config files themselves.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/lantern/config.toml` (system)
//! 2. `~/.config/lantern/config.toml` (user)
//! 3. `./lantern.toml` (local override)
//! 4. Environment variables (`LANTERN_*`)
//!
//! # Example Config
//!
//! ```toml
//! [hyperion]
//! address = "10.0.0.20"
//! proto_port = 19445
//! json_port = 19444
//!
//! [capture]
//! enabled = false
//! frame_rate = 30
//! scale_width = 64
//! scale_height = 64
//! priority = 100
//!
//! [audio]
//! enabled = true
//! frame_rate = 30
//! priority = 128
//!
//! [leds]
//! count_top = 20
//! count_bottom = 20
//! count_side = 12
//! start_corner = "bottom_left"
//! direction = "clockwise"
//!
//! [log]
//! level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files, ConfigSources};
pub use sections::{
    AudioConfig, CaptureConfig, HyperionConfig, LedConfig, LedCorner, LedDirection, LogConfig,
};

use std::path::PathBuf;

use lanternproto::settings::{keys, SettingsSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete lantern configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanternConfig {
    #[serde(default)]
    pub hyperion: HyperionConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub leds: LedConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl LanternConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local
    /// `./lantern.toml` override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = LanternConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Flatten into the snapshot pushed to every worker. One snapshot
    /// serves all workers; each worker's setting units pick out the keys
    /// they bound.
    pub fn snapshot(&self) -> SettingsSnapshot {
        let mut snap = SettingsSnapshot::new();
        snap.insert(keys::HYPERION_ADDRESS, self.hyperion.address.clone().into());
        snap.insert(keys::HYPERION_PROTO_PORT, self.hyperion.proto_port.into());
        snap.insert(keys::HYPERION_JSON_PORT, self.hyperion.json_port.into());

        snap.insert(keys::CAPTURE_FRAME_RATE, self.capture.frame_rate.into());
        snap.insert(keys::CAPTURE_SCALE_WIDTH, self.capture.scale_width.into());
        snap.insert(keys::CAPTURE_SCALE_HEIGHT, self.capture.scale_height.into());
        snap.insert(keys::CAPTURE_PRIORITY, self.capture.priority.into());

        snap.insert(keys::AUDIO_FRAME_RATE, self.audio.frame_rate.into());
        snap.insert(keys::AUDIO_PRIORITY, self.audio.priority.into());

        snap.insert(keys::LED_COUNT_TOP, self.leds.count_top.into());
        snap.insert(keys::LED_COUNT_BOTTOM, self.leds.count_bottom.into());
        snap.insert(keys::LED_COUNT_SIDE, self.leds.count_side.into());
        snap.insert(
            keys::LED_START_CORNER,
            serde_json::json!(self.leds.start_corner),
        );
        snap.insert(keys::LED_DIRECTION, serde_json::json!(self.leds.direction));
        snap
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Lantern Configuration\n\n");

        output.push_str("[hyperion]\n");
        output.push_str(&format!("address = \"{}\"\n", self.hyperion.address));
        output.push_str(&format!("proto_port = {}\n", self.hyperion.proto_port));
        output.push_str(&format!("json_port = {}\n", self.hyperion.json_port));

        output.push_str("\n[capture]\n");
        output.push_str(&format!("enabled = {}\n", self.capture.enabled));
        output.push_str(&format!("frame_rate = {}\n", self.capture.frame_rate));
        output.push_str(&format!("scale_width = {}\n", self.capture.scale_width));
        output.push_str(&format!("scale_height = {}\n", self.capture.scale_height));
        output.push_str(&format!("priority = {}\n", self.capture.priority));

        output.push_str("\n[audio]\n");
        output.push_str(&format!("enabled = {}\n", self.audio.enabled));
        output.push_str(&format!("frame_rate = {}\n", self.audio.frame_rate));
        output.push_str(&format!("priority = {}\n", self.audio.priority));

        output.push_str("\n[leds]\n");
        output.push_str(&format!("count_top = {}\n", self.leds.count_top));
        output.push_str(&format!("count_bottom = {}\n", self.leds.count_bottom));
        output.push_str(&format!("count_side = {}\n", self.leds.count_side));
        output.push_str(&format!(
            "start_corner = \"{}\"\n",
            self.leds.start_corner.as_str()
        ));
        output.push_str(&format!(
            "direction = \"{}\"\n",
            self.leds.direction.as_str()
        ));

        output.push_str("\n[log]\n");
        output.push_str(&format!("level = \"{}\"\n", self.log.level));

        output
    }
}
