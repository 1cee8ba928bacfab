//! Test Fixtures Module
//!
//! Shared fixtures for the integration tests:
//! - Audio fixtures (programmatically generated)
//! - A fake audio host with a manual output clock
//! - A fake transport that records outbound messages and injects events
//! - A mock WebSocket voice service

// Allow dead code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]

pub mod audio_fixtures;
pub mod devices;
pub mod transport;
pub mod voice_service;

pub use audio_fixtures::*;
pub use devices::*;
pub use transport::*;
pub use voice_service::*;

use std::time::Duration;

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Default bound for [`wait_until`] in tests
pub const WAIT: Duration = Duration::from_secs(2);
