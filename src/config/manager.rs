use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::session::SessionConfig;
use crate::error::{AppError, Result};
use crate::protocol::DEFAULT_TUNNEL_ENDPOINT;
use crate::transport::MAX_RECONNECT_DELAY;

/// Bridge-wide settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    /// Gateway endpoint each session tunnel is opened against.
    pub endpoint: String,
    /// Base reconnect delay for the duplex socket, 0 disables reconnection.
    pub reconnect_delay_secs: f64,
    /// Where downloaded files are written. Defaults to the user's download dir.
    pub download_dir: Option<PathBuf>,
    pub overlay_reveal_px: f64,
    pub pointer_hide_delay_ms: u64,
    pub touch_hide_delay_ms: u64,
    pub long_press_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_TUNNEL_ENDPOINT.to_string(),
            reconnect_delay_secs: 3.0,
            download_dir: None,
            overlay_reveal_px: 4.0,
            pointer_hide_delay_ms: 2000,
            touch_hide_delay_ms: 6000,
            long_press_ms: 1000,
        }
    }
}

impl BridgeSettings {
    /// Base reconnect delay, clamped to `0..=MAX_RECONNECT_DELAY`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.reconnect_delay_secs.max(0.0))
            .map(|delay| delay.min(MAX_RECONNECT_DELAY))
            .unwrap_or(MAX_RECONNECT_DELAY)
    }

    pub fn validate(&self) -> Result<()> {
        let delay = self.reconnect_delay_secs;
        if !(0.0..=MAX_RECONNECT_DELAY.as_secs_f64()).contains(&delay) {
            return Err(AppError::ConfigError(format!(
                "reconnect_delay_secs must be between 0 and {}, got {}",
                MAX_RECONNECT_DELAY.as_secs(),
                delay
            )));
        }
        if !self.overlay_reveal_px.is_finite() || self.overlay_reveal_px < 0.0 {
            return Err(AppError::ConfigError(format!(
                "overlay_reveal_px must be a non-negative number, got {}",
                self.overlay_reveal_px
            )));
        }
        Ok(())
    }

    pub fn pointer_hide_delay(&self) -> Duration {
        Duration::from_millis(self.pointer_hide_delay_ms)
    }

    pub fn touch_hide_delay(&self) -> Duration {
        Duration::from_millis(self.touch_hide_delay_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }

    /// Configured download directory, falling back to the platform default.
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// A saved session the operator can reopen by name
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionProfile {
    pub id: String,
    pub display_name: String,
    pub session: SessionConfig,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl SessionProfile {
    /// Creates a new profile; the display name defaults to the remote host
    pub fn new(session: SessionConfig) -> Self {
        let display_name = session.remote.host.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name,
            session,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.display_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Display name cannot be empty".to_string(),
            ));
        }
        self.session.validate()
    }

    /// Updates the last used timestamp
    pub fn update_last_used(&mut self) {
        self.last_used = Some(Utc::now());
    }

    pub fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }
}

/// Main configuration structure
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub profiles: Vec<SessionProfile>,
    #[serde(default)]
    pub settings: BridgeSettings,
}

/// Loads and persists profiles and settings
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Create a configuration manager with a custom config path (useful for testing)
    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the default configuration file path
    fn get_config_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| AppError::ConfigError("Home directory not found".to_string()))?;

        let config_dir = home_dir.join(".config").join("gatelink");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|e| {
                AppError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(config_dir.join("config.toml"))
    }

    fn load_config_from_path(config_path: &Path) -> Result<Config> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(config_path)
            .map_err(|e| AppError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.settings.validate()?;

        Ok(config)
    }

    /// Persist current config to disk
    pub fn save(&self) -> Result<()> {
        let toml = toml::to_string_pretty(&self.config)
            .map_err(|e| AppError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(&self.config_path, toml)
            .map_err(|e| AppError::ConfigError(format!("Failed to write config: {}", e)))?;
        Ok(())
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.config.settings
    }

    pub fn profiles(&self) -> &[SessionProfile] {
        &self.config.profiles
    }

    /// Look a profile up by id or display name
    pub fn find_profile(&self, key: &str) -> Option<&SessionProfile> {
        self.config
            .profiles
            .iter()
            .find(|p| p.id == key || p.display_name == key)
    }

    /// Add a new profile and persist it
    pub fn add_profile(&mut self, profile: SessionProfile) -> Result<()> {
        profile.validate()?;

        // Best-effort dedup: same host/port/user/protocol
        let remote = &profile.session.remote;
        if !self.config.profiles.iter().any(|p| {
            let existing = &p.session.remote;
            existing.host == remote.host
                && existing.port == remote.port
                && existing.username == remote.username
                && existing.protocol == remote.protocol
        }) {
            self.config.profiles.push(profile);
        }
        self.save()
    }

    pub fn update_profile(&mut self, profile: SessionProfile) -> Result<()> {
        profile.validate()?;

        if let Some(existing) = self
            .config
            .profiles
            .iter_mut()
            .find(|p| p.id == profile.id)
        {
            *existing = profile;
            self.save()
        } else {
            Err(AppError::ConfigError("Profile not found".to_string()))
        }
    }

    pub fn remove_profile(&mut self, id: &str) -> Result<()> {
        let initial_len = self.config.profiles.len();
        self.config.profiles.retain(|p| p.id != id);

        if self.config.profiles.len() == initial_len {
            Err(AppError::ConfigError("Profile not found".to_string()))
        } else {
            self.save()
        }
    }

    /// Update last_used for a profile by id and persist
    pub fn touch_last_used(&mut self, id: &str) -> Result<()> {
        if let Some(p) = self.config.profiles.iter_mut().find(|p| p.id == id) {
            p.update_last_used();
            self.save()?;
        }
        Ok(())
    }
}
