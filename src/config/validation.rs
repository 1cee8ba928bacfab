use url::Url;

use super::{ConfigError, VoiceConfig};

/// Reject configurations a session could not run with.
pub(super) fn validate(config: &VoiceConfig) -> Result<(), ConfigError> {
    validate_endpoint(&config.endpoint)?;

    positive("capture.sample_rate", config.capture.sample_rate as u64)?;
    positive("capture.frame_len", config.capture.frame_len as u64)?;
    positive("playback.sample_rate", config.playback.sample_rate as u64)?;
    positive(
        "session.outbound_queue_capacity",
        config.session.outbound_queue_capacity as u64,
    )?;
    positive(
        "session.event_queue_capacity",
        config.session.event_queue_capacity as u64,
    )?;
    positive(
        "session.handshake_timeout_ms",
        config.session.handshake_timeout_ms,
    )?;
    positive("session.tool_timeout_ms", config.session.tool_timeout_ms)?;

    for (key, persona) in &config.personas {
        if persona.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("persona '{key}' has no name")));
        }
        if persona.instructions.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "persona '{key}' has empty instructions"
            )));
        }
    }

    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConfigError::Invalid(format!("endpoint '{endpoint}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "endpoint must use ws:// or wss://, got {other}://"
        ))),
    }
}

fn positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }
    Ok(())
}
