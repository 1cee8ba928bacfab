use std::str::FromStr;

use super::{ApiKey, ConfigError, VoiceConfig};

pub(super) const ENDPOINT: &str = "KEEPSAKE_VOICE_ENDPOINT";
pub(super) const API_KEY: &str = "KEEPSAKE_VOICE_API_KEY";
pub(super) const MODEL: &str = "KEEPSAKE_VOICE_MODEL";
pub(super) const VOICE: &str = "KEEPSAKE_VOICE_VOICE";
pub(super) const CAPTURE_SAMPLE_RATE: &str = "KEEPSAKE_VOICE_CAPTURE_SAMPLE_RATE";
pub(super) const CAPTURE_FRAME_LEN: &str = "KEEPSAKE_VOICE_CAPTURE_FRAME_LEN";
pub(super) const PLAYBACK_SAMPLE_RATE: &str = "KEEPSAKE_VOICE_PLAYBACK_SAMPLE_RATE";
pub(super) const OUTBOUND_QUEUE_CAPACITY: &str = "KEEPSAKE_VOICE_OUTBOUND_QUEUE_CAPACITY";
pub(super) const EVENT_QUEUE_CAPACITY: &str = "KEEPSAKE_VOICE_EVENT_QUEUE_CAPACITY";
pub(super) const HANDSHAKE_TIMEOUT_MS: &str = "KEEPSAKE_VOICE_HANDSHAKE_TIMEOUT_MS";
pub(super) const TOOL_TIMEOUT_MS: &str = "KEEPSAKE_VOICE_TOOL_TIMEOUT_MS";
pub(super) const VOICE_INPUT_PLACEHOLDER: &str = "KEEPSAKE_VOICE_INPUT_PLACEHOLDER";

#[cfg(test)]
pub(super) const ENV_VARS: [&str; 12] = [
    ENDPOINT,
    API_KEY,
    MODEL,
    VOICE,
    CAPTURE_SAMPLE_RATE,
    CAPTURE_FRAME_LEN,
    PLAYBACK_SAMPLE_RATE,
    OUTBOUND_QUEUE_CAPACITY,
    EVENT_QUEUE_CAPACITY,
    HANDSHAKE_TIMEOUT_MS,
    TOOL_TIMEOUT_MS,
    VOICE_INPUT_PLACEHOLDER,
];

/// Overlay every set `KEEPSAKE_VOICE_*` variable onto `config`.
pub(super) fn apply_env(config: &mut VoiceConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = string_var(ENDPOINT) {
        config.endpoint = endpoint;
    }
    if let Some(key) = string_var(API_KEY) {
        config.api_key = Some(ApiKey::new(key));
    }
    if let Some(model) = string_var(MODEL) {
        config.model = Some(model);
    }
    if let Some(voice) = string_var(VOICE) {
        config.voice = Some(voice);
    }

    if let Some(rate) = parsed_var(CAPTURE_SAMPLE_RATE)? {
        config.capture.sample_rate = rate;
    }
    if let Some(len) = parsed_var(CAPTURE_FRAME_LEN)? {
        config.capture.frame_len = len;
    }
    if let Some(rate) = parsed_var(PLAYBACK_SAMPLE_RATE)? {
        config.playback.sample_rate = rate;
    }
    if let Some(capacity) = parsed_var(OUTBOUND_QUEUE_CAPACITY)? {
        config.session.outbound_queue_capacity = capacity;
    }
    if let Some(capacity) = parsed_var(EVENT_QUEUE_CAPACITY)? {
        config.session.event_queue_capacity = capacity;
    }
    if let Some(ms) = parsed_var(HANDSHAKE_TIMEOUT_MS)? {
        config.session.handshake_timeout_ms = ms;
    }
    if let Some(ms) = parsed_var(TOOL_TIMEOUT_MS)? {
        config.session.tool_timeout_ms = ms;
    }
    if let Some(placeholder) = string_var(VOICE_INPUT_PLACEHOLDER) {
        config.session.voice_input_placeholder = placeholder;
    }

    Ok(())
}

/// A set, non-blank variable.
fn string_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string_var(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                reason: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}
