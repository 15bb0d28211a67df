use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{app::Cli, volume::DEFAULT_STEP};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

const DEFAULT_OVERLAY_COLOR: &str = "#000000";
const DEFAULT_TEXT_COLOR: &str = "#ffffff";
const DEFAULT_OVERLAY_OPACITY: f64 = 0.3;
const DEFAULT_OVERLAY_DURATION_MS: u64 = 700;
const FALLBACK_OVERLAY_DURATION_MS: u64 = 1600;
const DEFAULT_SCAN_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(alias = "extensionEnabled")]
    pub enabled: bool,
    pub volume_step: f64,
    pub overlay_color: String,
    pub overlay_opacity: f64,
    pub overlay_duration: u64,
    pub text_color: String,
    pub scan_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume_step: DEFAULT_STEP,
            overlay_color: DEFAULT_OVERLAY_COLOR.to_string(),
            overlay_opacity: DEFAULT_OVERLAY_OPACITY,
            overlay_duration: DEFAULT_OVERLAY_DURATION_MS,
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL_MS,
        }
    }
}

impl Settings {
    /// Replaces out-of-range values with their defaults.
    pub fn sanitized(mut self) -> Self {
        if !(self.volume_step > 0.0 && self.volume_step <= 1.0) {
            log::warn!(
                "Ignoring volume step {}; using {DEFAULT_STEP}",
                self.volume_step
            );
            self.volume_step = DEFAULT_STEP;
        }
        self.overlay_opacity = if self.overlay_opacity.is_nan() {
            DEFAULT_OVERLAY_OPACITY
        } else {
            self.overlay_opacity.clamp(0.0, 1.0)
        };
        if self.scan_interval == 0 {
            self.scan_interval = DEFAULT_SCAN_INTERVAL_MS;
        }
        self
    }

    pub fn overlay_duration(&self) -> Duration {
        match self.overlay_duration {
            0 => Duration::from_millis(FALLBACK_OVERLAY_DURATION_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval.max(1))
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Config {
    pub settings: Settings,
}

impl Config {
    pub fn read(file: &mut impl Read) -> anyhow::Result<Self> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read config file")?;

        let settings: Settings =
            toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(Self {
            settings: settings.sanitized(),
        })
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut file = File::open(path).context("Failed to open config file")?;
        Self::read(&mut file)
    }

    pub fn from_cli_args(args: &Cli) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(config_path) => Self::read_path(config_path)?,
            None => {
                let default_config = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_config.exists() {
                    log::info!("Using default config file {DEFAULT_CONFIG_PATH}");
                    Self::read_path(default_config)?
                } else {
                    log::info!("No config file found; using default settings");
                    Config::default()
                }
            }
        };
        if let Some(scan_interval) = args.scan_interval {
            config.settings.scan_interval = scan_interval;
            config.settings = config.settings.sanitized();
        }
        Ok(config)
    }
}

/// Live settings with subscribe/notify. Every engine reads through its own
/// subscription instead of a shared global.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    sender: watch::Sender<Settings>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> Self {
        let (sender, _) = watch::channel(settings.sanitized());
        Self { sender }
    }

    pub fn current(&self) -> Settings {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.sender.subscribe()
    }

    pub fn set(&self, settings: Settings) {
        self.sender.send_replace(settings.sanitized());
    }

    /// Merges a storage-change style JSON object, e.g. `{"volumeStep": 0.1}`,
    /// into the current settings.
    pub fn apply_changes(&self, changes: &serde_json::Value) -> anyhow::Result<()> {
        let mut merged =
            serde_json::to_value(self.current()).context("Failed to serialize settings")?;
        let (Some(merged_fields), Some(changed_fields)) =
            (merged.as_object_mut(), changes.as_object())
        else {
            return Err(anyhow::anyhow!("Settings changes must be a JSON object"));
        };
        for (key, value) in changed_fields {
            let key = if key == "extensionEnabled" {
                "enabled"
            } else {
                key.as_str()
            };
            merged_fields.insert(key.to_string(), value.clone());
        }
        let settings: Settings =
            serde_json::from_value(merged).context("Failed to apply settings changes")?;
        self.set(settings);
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use clap::Parser;
    use serde_json::json;

    use super::*;

    const TEST_CONFIG: &str = r##"
enabled = true
volumeStep = 0.1
overlayColor = "#1e90ff"
overlayOpacity = 0.5
overlayDuration = 1200
textColor = "#000000"
scanInterval = 1000
"##;

    #[test]
    fn should_parse_config() {
        // given
        let mut config_file = Cursor::new(TEST_CONFIG);

        // when
        let config = Config::read(&mut config_file).unwrap();

        // then
        assert_eq!(
            config,
            Config {
                settings: Settings {
                    enabled: true,
                    volume_step: 0.1,
                    overlay_color: "#1e90ff".to_string(),
                    overlay_opacity: 0.5,
                    overlay_duration: 1200,
                    text_color: "#000000".to_string(),
                    scan_interval: 1000,
                }
            }
        )
    }

    #[test]
    fn should_fill_unset_fields_with_defaults() {
        // given
        let mut config_file = Cursor::new("extensionEnabled = false");

        // when
        let config = Config::read(&mut config_file).unwrap();

        // then
        assert_eq!(
            config.settings,
            Settings {
                enabled: false,
                ..Settings::default()
            }
        );
    }

    #[test]
    fn should_return_error_on_invalid_syntax() {
        // given
        let mut config_file = Cursor::new("volumeStep = ");

        // when
        let result = Config::read(&mut config_file);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_sanitize_out_of_range_values() {
        // given
        let mut config_file =
            Cursor::new("volumeStep = 1.5\noverlayOpacity = 3.0\nscanInterval = 0");

        // when
        let settings = Config::read(&mut config_file).unwrap().settings;

        // then
        assert_eq!(settings.volume_step, DEFAULT_STEP);
        assert_eq!(settings.overlay_opacity, 1.0);
        assert_eq!(settings.scan_interval, DEFAULT_SCAN_INTERVAL_MS);
    }

    #[test]
    fn should_read_config_from_path() {
        // given
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"volumeStep = 0.02").unwrap();

        // when
        let config = Config::read_path(file.path()).unwrap();

        // then
        assert_eq!(config.settings.volume_step, 0.02);
    }

    #[test]
    fn should_fall_back_when_overlay_duration_is_zero() {
        let settings = Settings {
            overlay_duration: 0,
            ..Settings::default()
        };

        assert_eq!(settings.overlay_duration(), Duration::from_millis(1600));
    }

    #[test]
    fn should_notify_subscribers_of_changes() {
        // given
        let store = ConfigStore::default();
        let mut subscription = store.subscribe();

        // when
        store
            .apply_changes(&json!({ "volumeStep": 0.1, "extensionEnabled": false }))
            .unwrap();

        // then
        assert!(subscription.has_changed().unwrap());
        let settings = subscription.borrow_and_update().clone();
        assert_eq!(settings.volume_step, 0.1);
        assert!(!settings.enabled);
    }

    #[test]
    fn should_reject_malformed_changes() {
        let store = ConfigStore::default();

        assert!(store.apply_changes(&json!([1, 2])).is_err());
        assert!(store.apply_changes(&json!({ "volumeStep": "lots" })).is_err());
        assert_eq!(store.current(), Settings::default());
    }

    #[test]
    fn should_let_cli_override_config_file() {
        // given
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"scanInterval = 1000\nvolumeStep = 0.1").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from([
            "scroll-volume",
            "--config",
            &path,
            "--scan-interval",
            "250",
            "scenario.json",
        ]);

        // when
        let config = Config::from_cli_args(&cli).unwrap();

        // then
        assert_eq!(config.settings.scan_interval, 250);
        assert_eq!(config.settings.volume_step, 0.1);
    }
}
