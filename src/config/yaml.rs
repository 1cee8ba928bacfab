use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{ApiKey, ConfigError, VoiceConfig};
use crate::core::session::PersonaConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// endpoint: "wss://voice.example.com/v1/realtime"
/// api_key: "your-api-key"
/// model: "conversational-native-audio"
/// voice: "Aoede"
///
/// capture:
///   sample_rate: 16000
///   frame_len: 4096
///
/// playback:
///   sample_rate: 24000
///
/// session:
///   outbound_queue_capacity: 64
///   event_queue_capacity: 1024
///   handshake_timeout_ms: 15000
///   tool_timeout_ms: 10000
///   voice_input_placeholder: "[voice message]"
///
/// personas:
///   storyteller:
///     instructions: "Tell short stories about the old days."
///     voice: "Charon"
///     opening_prompt: "Tell me a story."
///     tools_enabled: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub capture: Option<CaptureYaml>,
    pub playback: Option<PlaybackYaml>,
    pub session: Option<SessionYaml>,
    pub personas: BTreeMap<String, PersonaYaml>,
}

/// Capture configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CaptureYaml {
    pub sample_rate: Option<u32>,
    pub frame_len: Option<usize>,
}

/// Playback configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub sample_rate: Option<u32>,
}

/// Session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub outbound_queue_capacity: Option<usize>,
    pub event_queue_capacity: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub tool_timeout_ms: Option<u64>,
    pub voice_input_placeholder: Option<String>,
}

/// Persona from YAML. The map key is the name unless `name` is given.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PersonaYaml {
    pub name: Option<String>,
    pub instructions: String,
    pub voice: Option<String>,
    pub opening_prompt: Option<String>,
    pub tools_enabled: bool,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;

        Ok(config)
    }

    /// Overlay every value present in the file onto `config`.
    pub fn apply(self, config: &mut VoiceConfig) {
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(key) = self.api_key {
            config.api_key = Some(ApiKey::new(key));
        }
        if self.model.is_some() {
            config.model = self.model;
        }
        if self.voice.is_some() {
            config.voice = self.voice;
        }

        if let Some(capture) = self.capture {
            if let Some(rate) = capture.sample_rate {
                config.capture.sample_rate = rate;
            }
            if let Some(len) = capture.frame_len {
                config.capture.frame_len = len;
            }
        }
        if let Some(rate) = self.playback.and_then(|p| p.sample_rate) {
            config.playback.sample_rate = rate;
        }
        if let Some(session) = self.session {
            let target = &mut config.session;
            if let Some(v) = session.outbound_queue_capacity {
                target.outbound_queue_capacity = v;
            }
            if let Some(v) = session.event_queue_capacity {
                target.event_queue_capacity = v;
            }
            if let Some(v) = session.handshake_timeout_ms {
                target.handshake_timeout_ms = v;
            }
            if let Some(v) = session.tool_timeout_ms {
                target.tool_timeout_ms = v;
            }
            if let Some(v) = session.voice_input_placeholder {
                target.voice_input_placeholder = v;
            }
        }

        for (key, persona) in self.personas {
            let persona = PersonaConfig {
                name: persona.name.unwrap_or_else(|| key.clone()),
                instructions: persona.instructions,
                voice: persona.voice,
                opening_prompt: persona.opening_prompt,
                tools_enabled: persona.tools_enabled,
            };
            config.personas.insert(key, persona);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
endpoint: "wss://voice.example.com/v1/realtime"
api_key: "yaml-key"
model: "m2"
voice: "Aoede"
capture:
  sample_rate: 16000
  frame_len: 2048
playback:
  sample_rate: 48000
session:
  outbound_queue_capacity: 32
  event_queue_capacity: 256
  handshake_timeout_ms: 5000
  tool_timeout_ms: 3000
  voice_input_placeholder: "(spoken)"
personas:
  storyteller:
    instructions: "Tell stories."
    voice: "Charon"
"#;
        let parsed: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let mut config = VoiceConfig::default();
        parsed.apply(&mut config);

        assert_eq!(config.endpoint, "wss://voice.example.com/v1/realtime");
        assert_eq!(config.api_key.as_ref().unwrap().expose(), "yaml-key");
        assert_eq!(config.capture.frame_len, 2048);
        assert_eq!(config.playback.sample_rate, 48000);
        assert_eq!(config.session.outbound_queue_capacity, 32);
        assert_eq!(config.session.voice_input_placeholder, "(spoken)");

        let storyteller = &config.personas["storyteller"];
        assert_eq!(storyteller.name, "storyteller");
        assert_eq!(storyteller.voice.as_deref(), Some("Charon"));
        assert!(!storyteller.tools_enabled);
    }

    #[test]
    fn test_yaml_config_partial() {
        let parsed: YamlConfig = serde_yaml::from_str("voice: \"Puck\"\n").unwrap();
        let mut config = VoiceConfig::default();
        parsed.apply(&mut config);

        assert_eq!(config.voice.as_deref(), Some("Puck"));
        assert_eq!(config.capture.sample_rate, 16000);
        assert!(config.personas.is_empty());
    }

    #[test]
    fn test_yaml_config_empty() {
        let parsed: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(parsed.endpoint.is_none());
        assert!(parsed.session.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("voice.yaml");

        fs::write(&config_path, "model: \"m1\"\nsession:\n  tool_timeout_ms: 100\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();

        assert_eq!(config.model, Some("m1".to_string()));
        assert_eq!(config.session.unwrap().tool_timeout_ms, Some(100));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/voice.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
