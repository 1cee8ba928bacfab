//! Ownership record for everything a live session holds.

use std::sync::Arc;

use crate::core::device::{CaptureContext, MicrophoneStream};
use crate::core::playback::SharedScheduler;
use crate::core::realtime::RemoteChannel;

/// One acquired resource.
pub enum OwnedResource {
    Microphone(Arc<dyn MicrophoneStream>),
    CaptureContext(Arc<dyn CaptureContext>),
    Playback(SharedScheduler),
    Channel(Box<dyn RemoteChannel>),
}

impl OwnedResource {
    pub fn label(&self) -> &'static str {
        match self {
            OwnedResource::Microphone(_) => "microphone",
            OwnedResource::CaptureContext(_) => "capture_context",
            OwnedResource::Playback(_) => "playback_context",
            OwnedResource::Channel(_) => "channel",
        }
    }

    async fn release(self) -> Result<(), String> {
        match self {
            OwnedResource::Microphone(mic) => mic.stop_tracks().map_err(|e| e.to_string()),
            OwnedResource::CaptureContext(ctx) => ctx.close().map_err(|e| e.to_string()),
            OwnedResource::Playback(scheduler) => {
                scheduler.lock().teardown().map_err(|e| e.to_string())
            }
            OwnedResource::Channel(mut channel) => channel.close().await.map_err(|e| e.to_string()),
        }
    }

    /// Release without awaiting. The channel is dropped, which aborts it.
    fn release_now(self) {
        let label = self.label();
        let result = match self {
            OwnedResource::Microphone(mic) => mic.stop_tracks().map_err(|e| e.to_string()),
            OwnedResource::CaptureContext(ctx) => ctx.close().map_err(|e| e.to_string()),
            OwnedResource::Playback(scheduler) => {
                scheduler.lock().teardown().map_err(|e| e.to_string())
            }
            OwnedResource::Channel(channel) => {
                drop(channel);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(resource = label, error = %e, "failed to release resource");
        }
    }
}

/// Resources in acquisition order: microphone, capture context, playback
/// context, remote channel.
///
/// Released front to back, which stops input before output and closes the
/// channel last. Every release is attempted even when an earlier one fails.
#[derive(Default)]
pub struct ResourceGroup {
    resources: Vec<OwnedResource>,
}

impl ResourceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: OwnedResource) {
        tracing::debug!(resource = resource.label(), "resource acquired");
        self.resources.push(resource);
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.resources.iter().map(OwnedResource::label).collect()
    }

    /// Release everything. Returns how many releases failed.
    pub async fn release_all(&mut self) -> usize {
        let mut failures = 0;
        for resource in std::mem::take(&mut self.resources) {
            let label = resource.label();
            match resource.release().await {
                Ok(()) => tracing::debug!(resource = label, "resource released"),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(resource = label, error = %e, "failed to release resource");
                }
            }
        }
        failures
    }
}

impl Drop for ResourceGroup {
    fn drop(&mut self) {
        if self.resources.is_empty() {
            return;
        }
        tracing::warn!(
            remaining = self.resources.len(),
            "resource group dropped without release"
        );
        for resource in std::mem::take(&mut self.resources) {
            resource.release_now();
        }
    }
}
