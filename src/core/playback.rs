//! Gapless playback scheduling.
//!
//! Chunks arrive whenever the network delivers them. The scheduler keeps a
//! single "next free slot" on the output clock and places every chunk exactly
//! there, so chunks that arrive in time concatenate with no silence and no
//! overlap, and a late chunk queues right behind whatever is playing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::audio::PlaybackChunk;
use crate::core::device::{DeviceError, DeviceResult, PlaybackDevice, SourceId};

/// Scheduler shared between the session loop and the lifecycle manager.
pub type SharedScheduler = Arc<Mutex<PlaybackScheduler>>;

/// One source registered with the output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Output clock time the source starts at
    pub start_at: f64,
    /// Seconds
    pub duration: f64,
    /// Arrival order of the chunk it plays
    pub sequence: u64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Schedules decoded chunks back to back on a playback device.
pub struct PlaybackScheduler {
    device: Option<Box<dyn PlaybackDevice>>,
    next_start_time: f64,
    active: HashMap<SourceId, ScheduledSource>,
    next_id: SourceId,
    speaking: Arc<AtomicBool>,
    halted: bool,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device: Some(device),
            next_start_time: 0.0,
            active: HashMap::new(),
            next_id: 1,
            speaking: Arc::new(AtomicBool::new(false)),
            halted: false,
        }
    }

    pub fn into_shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    /// Flag that is `true` while any source is scheduled or playing.
    ///
    /// The flag can be read without taking the scheduler lock.
    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active sources ordered by start time.
    pub fn active_sources(&self) -> Vec<ScheduledSource> {
        let mut sources: Vec<_> = self.active.values().copied().collect();
        sources.sort_by(|a, b| a.start_at.total_cmp(&b.start_at));
        sources
    }

    /// Current output clock, or `None` once torn down.
    pub fn now(&self) -> Option<f64> {
        self.device.as_ref().map(|d| d.now())
    }

    pub fn device_sample_rate(&self) -> Option<u32> {
        self.device.as_ref().map(|d| d.sample_rate())
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }

    /// Schedule `chunk` at the next free slot and return where it landed.
    ///
    /// A chunk whose rate differs from the device rate is resampled first. If
    /// the device refuses the chunk the clock is left untouched.
    pub fn enqueue(&mut self, chunk: PlaybackChunk) -> DeviceResult<ScheduledSource> {
        if self.halted {
            return Err(DeviceError::Closed);
        }
        let Some(device) = self.device.as_mut() else {
            return Err(DeviceError::Closed);
        };

        let now = device.now();
        let chunk = chunk.resampled(device.sample_rate());
        let duration = chunk.duration();

        // never schedule in the past
        let start_at = self.next_start_time.max(now);

        let id = self.next_id;
        device.schedule(id, Arc::clone(&chunk.samples), start_at)?;
        self.next_id += 1;
        self.next_start_time = start_at + duration;

        let source = ScheduledSource {
            id,
            start_at,
            duration,
            sequence: chunk.sequence,
        };
        self.active.insert(id, source);
        self.reap_expired(now);
        self.sync_speaking();

        tracing::trace!(
            source = id,
            sequence = chunk.sequence,
            start_at,
            duration,
            "chunk scheduled"
        );
        Ok(source)
    }

    /// Record the natural end of a source.
    pub fn complete(&mut self, id: SourceId) -> bool {
        let removed = self.active.remove(&id).is_some();
        if removed {
            tracing::trace!(source = id, "source finished");
        }
        self.sync_speaking();
        removed
    }

    /// Stop every source, clear the active set and reset the clock.
    ///
    /// Synchronous: when this returns no stale source survives.
    pub fn flush(&mut self) {
        if let Some(device) = self.device.as_mut() {
            for id in self.active.keys() {
                if let Err(e) = device.stop_source(*id) {
                    tracing::warn!(source = id, error = %e, "failed to stop source");
                }
            }
        }
        let stopped = self.active.len();
        self.active.clear();
        self.next_start_time = 0.0;
        self.sync_speaking();
        if stopped > 0 {
            tracing::debug!(stopped, "playback flushed");
        }
    }

    /// Flush and refuse every later chunk, keeping the device open.
    pub fn halt(&mut self) {
        self.halted = true;
        self.flush();
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Flush and release the output device. Idempotent.
    pub fn teardown(&mut self) -> DeviceResult<()> {
        self.halted = true;
        self.flush();
        match self.device.take() {
            Some(mut device) => device.close(),
            None => Ok(()),
        }
    }

    /// Drop sources whose scheduled end has already passed.
    ///
    /// Covers completion notifications that never arrived.
    fn reap_expired(&mut self, now: f64) {
        let before = self.active.len();
        self.active.retain(|_, s| s.end_at() > now);
        let reaped = before - self.active.len();
        if reaped > 0 {
            tracing::debug!(reaped, "reaped expired playback sources");
        }
    }

    fn sync_speaking(&self) {
        self.speaking.store(!self.active.is_empty(), Ordering::SeqCst);
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "failed to close playback device on drop");
        }
    }
}
