//! Config file discovery, loading, and environment variable overlay.

use std::env;
use std::path::{Path, PathBuf};

use crate::{ConfigError, LanternConfig};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/lantern/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("lantern/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("lantern.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay one TOML file onto `config`. Only keys present in the file are
/// touched, so later layers refine earlier ones instead of resetting them.
pub fn apply_file(config: &mut LanternConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    apply_toml(config, &contents, path)
}

fn apply_toml(config: &mut LanternConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if let Some(hyperion) = table.get("hyperion").and_then(|v| v.as_table()) {
        if let Some(v) = hyperion.get("address").and_then(|v| v.as_str()) {
            config.hyperion.address = v.to_string();
        }
        if let Some(v) = hyperion.get("proto_port").and_then(|v| v.as_integer()) {
            config.hyperion.proto_port = v as u16;
        }
        if let Some(v) = hyperion.get("json_port").and_then(|v| v.as_integer()) {
            config.hyperion.json_port = v as u16;
        }
    }

    if let Some(capture) = table.get("capture").and_then(|v| v.as_table()) {
        if let Some(v) = capture.get("enabled").and_then(|v| v.as_bool()) {
            config.capture.enabled = v;
        }
        if let Some(v) = capture.get("frame_rate").and_then(|v| v.as_integer()) {
            config.capture.frame_rate = v as u32;
        }
        if let Some(v) = capture.get("scale_width").and_then(|v| v.as_integer()) {
            config.capture.scale_width = v as u32;
        }
        if let Some(v) = capture.get("scale_height").and_then(|v| v.as_integer()) {
            config.capture.scale_height = v as u32;
        }
        if let Some(v) = capture.get("priority").and_then(|v| v.as_integer()) {
            config.capture.priority = v;
        }
    }

    if let Some(audio) = table.get("audio").and_then(|v| v.as_table()) {
        if let Some(v) = audio.get("enabled").and_then(|v| v.as_bool()) {
            config.audio.enabled = v;
        }
        if let Some(v) = audio.get("frame_rate").and_then(|v| v.as_integer()) {
            config.audio.frame_rate = v as u32;
        }
        if let Some(v) = audio.get("priority").and_then(|v| v.as_integer()) {
            config.audio.priority = v;
        }
    }

    if let Some(leds) = table.get("leds").and_then(|v| v.as_table()) {
        if let Some(v) = leds.get("count_top").and_then(|v| v.as_integer()) {
            config.leds.count_top = v as u32;
        }
        if let Some(v) = leds.get("count_bottom").and_then(|v| v.as_integer()) {
            config.leds.count_bottom = v as u32;
        }
        if let Some(v) = leds.get("count_side").and_then(|v| v.as_integer()) {
            config.leds.count_side = v as u32;
        }
        if let Some(v) = leds.get("start_corner").and_then(|v| v.as_str()) {
            match serde_json::from_value(serde_json::Value::String(v.to_string())) {
                Ok(corner) => config.leds.start_corner = corner,
                Err(e) => {
                    return Err(ConfigError::Parse {
                        path: path.to_path_buf(),
                        message: format!("leds.start_corner: {e}"),
                    })
                }
            }
        }
        if let Some(v) = leds.get("direction").and_then(|v| v.as_str()) {
            match serde_json::from_value(serde_json::Value::String(v.to_string())) {
                Ok(direction) => config.leds.direction = direction,
                Err(e) => {
                    return Err(ConfigError::Parse {
                        path: path.to_path_buf(),
                        message: format!("leds.direction: {e}"),
                    })
                }
            }
        }
    }

    if let Some(log) = table.get("log").and_then(|v| v.as_table()) {
        if let Some(v) = log.get("level").and_then(|v| v.as_str()) {
            config.log.level = v.to_string();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut LanternConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("LANTERN_HYPERION_ADDRESS") {
        config.hyperion.address = v;
        sources.env_overrides.push("LANTERN_HYPERION_ADDRESS".to_string());
    }
    if let Ok(v) = env::var("LANTERN_HYPERION_PROTO_PORT") {
        if let Ok(port) = v.parse() {
            config.hyperion.proto_port = port;
            sources
                .env_overrides
                .push("LANTERN_HYPERION_PROTO_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("LANTERN_HYPERION_JSON_PORT") {
        if let Ok(port) = v.parse() {
            config.hyperion.json_port = port;
            sources
                .env_overrides
                .push("LANTERN_HYPERION_JSON_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("LANTERN_CAPTURE_ENABLED") {
        if let Ok(enabled) = v.parse() {
            config.capture.enabled = enabled;
            sources.env_overrides.push("LANTERN_CAPTURE_ENABLED".to_string());
        }
    }
    if let Ok(v) = env::var("LANTERN_AUDIO_ENABLED") {
        if let Ok(enabled) = v.parse() {
            config.audio.enabled = enabled;
            sources.env_overrides.push("LANTERN_AUDIO_ENABLED".to_string());
        }
    }
    if let Ok(v) = env::var("LANTERN_LOG_LEVEL") {
        config.log.level = v;
        sources.env_overrides.push("LANTERN_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.log.level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
