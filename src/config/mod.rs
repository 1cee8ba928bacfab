//! Configuration for the voice engine
//!
//! Configuration comes from environment variables and an optional YAML file.
//! Priority: YAML > ENV vars > .env values > defaults. The `.env` file is
//! loaded by the binary at startup.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use keepsake_voice::config::VoiceConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = VoiceConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = VoiceConfig::from_file(&PathBuf::from("voice.yaml"))?;
//! println!("{config}");
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{CAPTURE_FRAME_LEN, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::core::realtime::{WS_CHANNEL_CAPACITY, WebSocketTransport};
use crate::core::session::{PersonaConfig, SessionSettings};
use crate::core::tools::DEFAULT_TOOL_TIMEOUT;
use crate::core::transcript::DEFAULT_VOICE_INPUT_PLACEHOLDER;

/// Default remote endpoint, a local development server.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8765/v1/realtime";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {reason}")]
    InvalidEnv { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Secret API key. Wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// The raw key, for building the authorization header.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Last four characters only.
    pub fn redacted(&self) -> String {
        let key = self.0.as_str();
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if key.chars().count() <= 8 {
            "****".to_string()
        } else {
            format!("****{tail}")
        }
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({})", self.redacted())
    }
}

impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per outbound frame
    pub frame_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_len: CAPTURE_FRAME_LEN,
        }
    }
}

/// Speaker output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

/// Session queue and timeout settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub outbound_queue_capacity: usize,
    pub event_queue_capacity: usize,
    pub handshake_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// User text committed for turns spoken without a transcript
    pub voice_input_placeholder: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: WS_CHANNEL_CAPACITY,
            event_queue_capacity: 1024,
            handshake_timeout_ms: 15_000,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT.as_millis() as u64,
            voice_input_placeholder: DEFAULT_VOICE_INPUT_PLACEHOLDER.to_string(),
        }
    }
}

/// Voice engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// WebSocket endpoint of the remote voice service (ws:// or wss://)
    pub endpoint: String,
    pub api_key: Option<ApiKey>,
    pub model: Option<String>,
    /// Voice used when a persona does not pick one
    pub voice: Option<String>,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub session: SessionConfig,
    /// Personas declared in configuration, keyed by name
    pub personas: BTreeMap<String, PersonaConfig>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: None,
            voice: None,
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            session: SessionConfig::default(),
            personas: BTreeMap::new(),
        }
    }
}

impl VoiceConfig {
    /// Load configuration from environment variables over defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// The merged configuration is validated before it is returned.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        env::apply_env(&mut config)?;
        yaml_config.apply(&mut config);

        validation::validate(&config)?;
        Ok(config)
    }

    /// Resolve a persona: configured personas shadow the built-in presets.
    pub fn persona(&self, name: &str) -> Option<PersonaConfig> {
        self.personas
            .get(name)
            .cloned()
            .or_else(|| PersonaConfig::builtin(name))
    }

    /// Every persona name that [`persona`](Self::persona) resolves.
    pub fn persona_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PersonaConfig::builtin_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        for name in self.personas.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.session.tool_timeout_ms)
    }

    /// Transport for the configured endpoint and key.
    pub fn transport(&self) -> WebSocketTransport {
        let transport = WebSocketTransport::new(self.endpoint.clone())
            .with_outbound_capacity(self.session.outbound_queue_capacity);
        match &self.api_key {
            Some(key) => transport.with_api_key(key.clone()),
            None => transport,
        }
    }
}

impl From<&VoiceConfig> for SessionSettings {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            model: config.model.clone(),
            default_voice: config.voice.clone(),
            capture_sample_rate: config.capture.sample_rate,
            capture_frame_len: config.capture.frame_len,
            playback_sample_rate: config.playback.sample_rate,
            event_queue_capacity: config.session.event_queue_capacity,
            handshake_timeout: Duration::from_millis(config.session.handshake_timeout_ms),
            voice_input_placeholder: config.session.voice_input_placeholder.clone(),
        }
    }
}

/// Human-readable dump with secrets redacted.
impl std::fmt::Display for VoiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let or_none = |v: &Option<String>| v.clone().unwrap_or_else(|| "(none)".to_string());
        writeln!(f, "endpoint: {}", self.endpoint)?;
        writeln!(
            f,
            "api_key: {}",
            self.api_key
                .as_ref()
                .map(ApiKey::redacted)
                .unwrap_or_else(|| "(none)".to_string())
        )?;
        writeln!(f, "model: {}", or_none(&self.model))?;
        writeln!(f, "voice: {}", or_none(&self.voice))?;
        writeln!(
            f,
            "capture: {} Hz, {} samples per frame",
            self.capture.sample_rate, self.capture.frame_len
        )?;
        writeln!(f, "playback: {} Hz", self.playback.sample_rate)?;
        writeln!(
            f,
            "session: outbound queue {}, event queue {}, handshake {}ms, tools {}ms",
            self.session.outbound_queue_capacity,
            self.session.event_queue_capacity,
            self.session.handshake_timeout_ms,
            self.session.tool_timeout_ms
        )?;
        writeln!(
            f,
            "voice input placeholder: {:?}",
            self.session.voice_input_placeholder
        )?;
        write!(f, "personas: {}", self.persona_names().join(", "))
    }
}
