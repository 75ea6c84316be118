use std::fs::OpenOptions;
use std::path::PathBuf;
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// List peripherals that advertise no name. Turning this off restores
    /// the legacy behavior of hiding them.
    pub include_unnamed: bool,

    /// Restrict scans to peripherals advertising one of these service UUIDs.
    /// Empty means no filter.
    pub service_filter: Vec<Uuid>,

    /// The address chosen in the previous run, so callers can offer it as a
    /// default.
    pub last_selected: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            include_unnamed: true,
            service_filter: Vec::new(),
            last_selected: None,
        }
    }
}

// btpicker.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_config_path() -> Result<PathBuf, ConfigError> {
    match ProjectDirs::from("org", "btpicker", "btpicker") {
        None => Err(ConfigError::NoConfigPath),
        Some(dirs) => Ok(dirs.config_dir().join("btpicker.json")),
    }
}

/// Exclusive advisory lock on the config file, held over a duplicated file
/// handle so the guard does not borrow the `ConfigStore` itself.
pub struct ConfigLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigLocker {
    /// Fails immediately when another instance holds the lock.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        self.rw_lock
            .try_write()
            .map_err(|source| ConfigError::CanNotLock { source })
    }
}

/// Owns the config file. The associated `ConfigLocker` keeps two instances
/// from driving the same radio at once.
pub struct ConfigStore {
    path: PathBuf,
    file: std::fs::File,
}

impl ConfigStore {
    pub fn open() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        info!("Using config file {}", path.to_string_lossy());

        let directory = path.parent().ok_or(ConfigError::NoConfigPath)?;
        std::fs::create_dir_all(directory)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(ConfigStore { path, file })
    }

    pub fn locker(&self) -> Result<ConfigLocker, ConfigError> {
        Ok(ConfigLocker {
            rw_lock: RwLock::new(self.file.try_clone()?),
        })
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found, using defaults");
                return Ok(Config::default());
            },
            Err(err) => return Err(err.into()),
        };

        if content.is_empty() {
            return Ok(Config::default());
        }

        let config = serde_json::from_slice(&content)?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&self.path, content.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str("{}").expect("parse failed");
        assert_eq!(config, Config::default());
        assert!(config.include_unnamed);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config {
            include_unnamed: false,
            service_filter: vec![Uuid::parse_str("bc2f4cc6-aaef-4351-9034-d66268e328f0").unwrap()],
            last_selected: Some("AA:BB:CC:DD:EE:FF".to_string()),
        };
        let json = serde_json::to_string(&config).expect("serialize failed");
        let parsed: Config = serde_json::from_str(&json).expect("parse failed");
        assert_eq!(parsed, config);
    }
}
