use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_gatt_binding".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Connection policy and logging for the binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindingSettings {
    /// Quiet period after which an unheld connection is dropped.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Upper bound on waiting for a device to show up in discovery.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_disconnect: bool,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            auto_disconnect: default_true(),
            log_settings: LogSettings::default(),
        }
    }
}

impl BindingSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}
fn default_discovery_timeout_ms() -> u64 {
    15_000
}

pub struct SettingsService {
    settings: BindingSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load from an explicit path, falling back to defaults.
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings, could not load {}: {}",
                    settings_path.display(),
                    e
                );
                BindingSettings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleGattBinding");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<BindingSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &BindingSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut BindingSettings {
        &mut self.settings
    }

    pub fn set_auto_disconnect(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.settings.auto_disconnect = enabled;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = BindingSettings::default();
        assert_eq!(settings.discovery_timeout(), Duration::from_secs(15));
        assert!(settings.auto_disconnect);
        assert!(!settings.log_settings.file_logging_enabled);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: BindingSettings = serde_json::from_str(r#"{"idle_timeout_ms": 500}"#).unwrap();
        assert_eq!(settings.idle_timeout(), Duration::from_millis(500));
        assert_eq!(settings.discovery_timeout_ms, 15_000);
        assert_eq!(settings.log_settings, LogSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::open(path.clone());
        assert_eq!(service.get(), &BindingSettings::default());
        service.get_mut().idle_timeout_ms = 1_000;
        service.set_auto_disconnect(false).unwrap();

        let reloaded = SettingsService::open(path);
        assert_eq!(reloaded.get().idle_timeout_ms, 1_000);
        assert!(!reloaded.get().auto_disconnect);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let service = SettingsService::open(path);
        assert_eq!(service.get(), &BindingSettings::default());
    }
}
