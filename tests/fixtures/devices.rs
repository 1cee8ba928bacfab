//! Fake audio host
//!
//! Records every acquisition and release in one log, lets tests push capture
//! frames by hand, and exposes a playback clock that only moves when told to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use keepsake_voice::core::audio::CaptureFrame;
use keepsake_voice::core::device::{
    AudioHost, CaptureContext, DeviceError, DeviceResult, FrameSink, MicrophoneStream,
    PlaybackDevice, SourceEndedSender, SourceId,
};

/// Shared acquisition/release log, e.g. `"acquire:microphone"`
pub type ResourceLog = Arc<Mutex<Vec<String>>>;

/// One source the fake playback device was asked to play
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledCall {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct HostState {
    pub log: ResourceLog,
    pub deny_microphone: AtomicBool,
    pub fail_playback: AtomicBool,
    pub microphone_delay: Mutex<Option<Duration>>,
    pub now: Mutex<f64>,
    pub sink: Mutex<Option<FrameSink>>,
    pub capture_started: AtomicBool,
    pub scheduled: Mutex<Vec<ScheduledCall>>,
    pub stopped: Mutex<Vec<SourceId>>,
    pub on_ended: Mutex<Option<SourceEndedSender>>,
}

/// Fake [`AudioHost`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakeHost {
    pub state: Arc<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a log with another fake, so release order spans both.
    pub fn with_log(log: ResourceLog) -> Self {
        Self {
            state: Arc::new(HostState {
                log,
                ..Default::default()
            }),
        }
    }

    pub fn log(&self) -> ResourceLog {
        Arc::clone(&self.state.log)
    }

    pub fn entries(&self) -> Vec<String> {
        self.state.log.lock().clone()
    }

    /// Release entries only, in order, without the prefix.
    pub fn releases(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_prefix("release:").map(str::to_string))
            .collect()
    }

    pub fn deny_microphone(&self) {
        self.state.deny_microphone.store(true, Ordering::SeqCst);
    }

    pub fn fail_playback(&self) {
        self.state.fail_playback.store(true, Ordering::SeqCst);
    }

    /// Make the permission prompt take `delay`.
    pub fn delay_microphone(&self, delay: Duration) {
        *self.state.microphone_delay.lock() = Some(delay);
    }

    pub fn set_now(&self, now: f64) {
        *self.state.now.lock() = now;
    }

    pub fn capture_started(&self) -> bool {
        self.state.capture_started.load(Ordering::SeqCst)
    }

    /// Deliver one frame as the capture thread would. False if capture is not running.
    pub fn push_frame(&self, frame: CaptureFrame) -> bool {
        let sink = self.state.sink.lock().clone();
        match sink {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.state.scheduled.lock().clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.stopped.lock().clone()
    }

    /// Report that a source played to its end.
    pub fn finish_source(&self, id: SourceId) {
        let notify = self.state.on_ended.lock().clone();
        if let Some(notify) = notify {
            notify(id);
        }
    }

    fn record(&self, entry: &str) {
        self.state.log.lock().push(entry.to_string());
    }
}

#[async_trait]
impl AudioHost for FakeHost {
    async fn request_microphone(&self, _sample_rate: u32) -> DeviceResult<Arc<dyn MicrophoneStream>> {
        let delay = *self.state.microphone_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.deny_microphone.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied("denied by user".to_string()));
        }
        self.record("acquire:microphone");
        Ok(Arc::new(FakeMicrophone {
            host: self.clone(),
            live: AtomicBool::new(true),
        }))
    }

    async fn open_capture_context(&self, sample_rate: u32) -> DeviceResult<Arc<dyn CaptureContext>> {
        self.record("acquire:capture_context");
        Ok(Arc::new(FakeCapture {
            host: self.clone(),
            sample_rate,
            closed: AtomicBool::new(false),
        }))
    }

    async fn open_playback_context(
        &self,
        sample_rate: u32,
        on_source_ended: SourceEndedSender,
    ) -> DeviceResult<Box<dyn PlaybackDevice>> {
        if self.state.fail_playback.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("no output device".to_string()));
        }
        self.record("acquire:playback_context");
        *self.state.on_ended.lock() = Some(on_source_ended);
        Ok(Box::new(FakePlayback {
            host: self.clone(),
            sample_rate,
            closed: false,
        }))
    }
}

struct FakeMicrophone {
    host: FakeHost,
    live: AtomicBool,
}

impl MicrophoneStream for FakeMicrophone {
    fn stop_tracks(&self) -> DeviceResult<()> {
        if self.live.swap(false, Ordering::SeqCst) {
            self.host.record("release:microphone");
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

struct FakeCapture {
    host: FakeHost,
    sample_rate: u32,
    closed: AtomicBool,
}

impl CaptureContext for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_capture(
        &self,
        _microphone: Arc<dyn MicrophoneStream>,
        _frame_len: usize,
        sink: FrameSink,
    ) -> DeviceResult<()> {
        *self.host.state.sink.lock() = Some(sink);
        self.host.state.capture_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> DeviceResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.host.state.sink.lock().take();
            self.host.record("release:capture_context");
        }
        Ok(())
    }
}

struct FakePlayback {
    host: FakeHost,
    sample_rate: u32,
    closed: bool,
}

impl PlaybackDevice for FakePlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        *self.host.state.now.lock()
    }

    fn schedule(&mut self, id: SourceId, samples: Arc<[f32]>, start_at: f64) -> DeviceResult<()> {
        self.host.state.scheduled.lock().push(ScheduledCall {
            id,
            start_at,
            duration: samples.len() as f64 / self.sample_rate as f64,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) -> DeviceResult<()> {
        self.host.state.stopped.lock().push(id);
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        if !self.closed {
            self.closed = true;
            self.host.record("release:playback_context");
        }
        Ok(())
    }
}
