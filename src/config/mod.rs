use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{AutoPlayMode, PlaybackMode, SinkKind, SinkPreference};
use crate::pipeline::cipher::CipherKey;

/// Engine configuration, persisted as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub prefill: PrefillConfig,
    pub locks: LockTimeouts,
    pub sink: SinkConfig,
    pub cipher: CipherConfig,
    pub playlist: PlaylistConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, target) in [
            ("prefill.local_target", self.prefill.local_target),
            ("prefill.wireless_target", self.prefill.wireless_target),
        ] {
            if !(target > 0.0 && target <= 1.0) {
                return Err(ConfigError::Invalid(format!("{} must be in (0, 1], got {}", name, target)));
            }
        }
        if self.prefill.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("prefill.poll_interval_ms must be positive".to_string()));
        }
        if self.sink.ring_buffer_samples < 256 {
            return Err(ConfigError::Invalid(format!(
                "sink.ring_buffer_samples must be at least 256, got {}",
                self.sink.ring_buffer_samples
            )));
        }
        self.cipher.key()?;
        Ok(())
    }
}

/// Buffer pre-fill tuning. The defaults are empirically tuned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefillConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub local_target: f32,
    pub wireless_target: f32,
    pub fallback_local_ms: u64,
    pub fallback_wireless_ms: u64,
    /// Held after pre-fill on the local path before the amplifier is unmuted
    pub local_settle_ms: u64,
    /// Fixed pre-buffer for sound effects, which unmute immediately
    pub effect_prebuffer_ms: u64,
}

impl Default for PrefillConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            timeout_ms: 1200,
            local_target: 0.75,
            wireless_target: 0.60,
            fallback_local_ms: 400,
            fallback_wireless_ms: 250,
            local_settle_ms: 100,
            effect_prebuffer_ms: 30,
        }
    }
}

impl PrefillConfig {
    pub fn target_for(&self, kind: SinkKind) -> f32 {
        match kind {
            SinkKind::Local => self.local_target,
            SinkKind::Wireless => self.wireless_target,
        }
    }

    pub fn fallback_for(&self, kind: SinkKind) -> Duration {
        match kind {
            SinkKind::Local => Duration::from_millis(self.fallback_local_ms),
            SinkKind::Wireless => Duration::from_millis(self.fallback_wireless_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn local_settle(&self) -> Duration {
        Duration::from_millis(self.local_settle_ms)
    }

    pub fn effect_prebuffer(&self) -> Duration {
        Duration::from_millis(self.effect_prebuffer_ms)
    }
}

/// Lock acquisition deadlines, short for latency-sensitive paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockTimeouts {
    /// pause / resume
    pub control_ms: u64,
    /// start / stop / effects
    pub start_ms: u64,
    /// completion poller, skipped on contention
    pub poll_ms: u64,
    pub playlist_ms: u64,
    /// album switch
    pub album_ms: u64,
}

impl Default for LockTimeouts {
    fn default() -> Self {
        Self {
            control_ms: 300,
            start_ms: 2000,
            poll_ms: 5,
            playlist_ms: 500,
            album_ms: 3000,
        }
    }
}

impl LockTimeouts {
    pub fn control(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }

    pub fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn playlist(&self) -> Duration {
        Duration::from_millis(self.playlist_ms)
    }

    pub fn album(&self) -> Duration {
        Duration::from_millis(self.album_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub default_preference: SinkPreference,
    /// Decoder output ring size, in interleaved samples
    pub ring_buffer_samples: usize,
    pub wireless_start_settle_ms: u64,
    pub wireless_stop_settle_ms: u64,
    /// Deadline for elements to acknowledge pause/stop
    pub element_ack_ms: u64,
    pub preferred_device: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            default_preference: SinkPreference::Auto,
            ring_buffer_samples: 32 * 1024,
            wireless_start_settle_ms: 50,
            wireless_stop_settle_ms: 150,
            element_ack_ms: 500,
            preferred_device: None,
        }
    }
}

impl SinkConfig {
    pub fn wireless_start_settle(&self) -> Duration {
        Duration::from_millis(self.wireless_start_settle_ms)
    }

    pub fn wireless_stop_settle(&self) -> Duration {
        Duration::from_millis(self.wireless_stop_settle_ms)
    }

    pub fn element_ack(&self) -> Duration {
        Duration::from_millis(self.element_ack_ms)
    }
}

/// Stream cipher key material and plaintext content locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// 16-byte AES key, base64
    pub key: String,
    /// 8-byte CTR nonce, base64
    pub nonce: String,
    /// Content below these directories is never encrypted
    pub plaintext_prefixes: Vec<PathBuf>,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            key: "c3Rvcnlib3gtZGV2LWtleQ==".to_string(),
            nonce: "c2J4bm9uY2U=".to_string(),
            plaintext_prefixes: vec![PathBuf::from("/sdcard/user")],
        }
    }
}

impl CipherConfig {
    pub fn key(&self) -> Result<CipherKey, ConfigError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let key = engine
            .decode(&self.key)
            .map_err(|e| ConfigError::Invalid(format!("cipher.key is not base64: {}", e)))?;
        let nonce = engine
            .decode(&self.nonce)
            .map_err(|e| ConfigError::Invalid(format!("cipher.nonce is not base64: {}", e)))?;

        let key: [u8; 16] = key
            .try_into()
            .map_err(|v: Vec<u8>| ConfigError::Invalid(format!("cipher.key must be 16 bytes, got {}", v.len())))?;
        let nonce: [u8; 8] = nonce
            .try_into()
            .map_err(|v: Vec<u8>| ConfigError::Invalid(format!("cipher.nonce must be 8 bytes, got {}", v.len())))?;

        Ok(CipherKey::new(key, nonce))
    }

    pub fn is_plaintext_location(&self, path: &Path) -> bool {
        self.plaintext_prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub supported_extensions: Vec<String>,
    pub default_mode: PlaybackMode,
    pub auto_play: AutoPlayMode,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            supported_extensions: ["mp3", "wav", "flac", "ogg", "m4a", "aac"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            default_mode: PlaybackMode::Sequential,
            auto_play: AutoPlayMode::Off,
        }
    }
}

/// Loads and saves the engine configuration file
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Open a configuration file at an explicit location. A missing file yields defaults.
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        config.validate()?;
        Ok(Self { config, config_path })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut candidate = self.config.clone();
        updater(&mut candidate);
        candidate.validate()?;
        self.config = candidate;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("storybox");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
