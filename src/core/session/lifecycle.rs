//! Session lifecycle: `Idle → Starting → Live → Stopping → Idle`.
//!
//! The manager owns every resource a session acquires and releases all of
//! them on every exit path. At most one session is live at a time.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    OwnedResource, PersonaConfig, ResourceGroup, SessionCallbacks, SessionCounters, SessionEvent,
    SessionStats, SpeakingNotifier, VoiceSession, frame_sink, source_ended_sender,
};
use crate::core::audio::{
    CAPTURE_FRAME_LEN, CAPTURE_SAMPLE_RATE, FrameEncoder, PLAYBACK_SAMPLE_RATE,
};
use crate::core::device::AudioHost;
use crate::core::playback::{PlaybackScheduler, SharedScheduler};
use crate::core::realtime::{EventSender, OutboundSender, RealtimeError, RealtimeTransport};
use crate::core::tools::ToolCallDispatcher;
use crate::core::transcript::{DEFAULT_VOICE_INPUT_PLACEHOLDER, TranscriptAggregator};
use crate::errors::{SessionError, SessionResult};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Starting,
    Live,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Live => write!(f, "live"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Session parameters that do not change between sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: Option<String>,
    pub default_voice: Option<String>,
    pub capture_sample_rate: u32,
    pub capture_frame_len: usize,
    pub playback_sample_rate: u32,
    pub event_queue_capacity: usize,
    pub handshake_timeout: Duration,
    pub voice_input_placeholder: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: None,
            default_voice: None,
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_frame_len: CAPTURE_FRAME_LEN,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            event_queue_capacity: 1024,
            handshake_timeout: Duration::from_secs(15),
            voice_input_placeholder: DEFAULT_VOICE_INPUT_PLACEHOLDER.to_string(),
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

enum Slot {
    Idle,
    Starting {
        session_id: String,
        cancel: CancellationToken,
    },
    Live(LiveSession),
    Stopping,
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Idle => SessionState::Idle,
            Slot::Starting { .. } => SessionState::Starting,
            Slot::Live(_) => SessionState::Live,
            Slot::Stopping => SessionState::Stopping,
        }
    }
}

struct LiveSession {
    session_id: String,
    resources: ResourceGroup,
    scheduler: SharedScheduler,
    speaking_flag: Arc<AtomicBool>,
    outbound: OutboundSender,
    events: EventSender,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    speaking: SpeakingNotifier,
    counters: Arc<SessionCounters>,
}

impl LiveSession {
    fn stats(&self) -> SessionStats {
        SessionStats::collect(&self.outbound.stats(), &self.counters)
    }

    fn into_pending(self) -> Pending {
        Pending {
            resources: self.resources,
            session_cancel: self.cancel,
            task: self.task,
        }
    }
}

/// What a start attempt holds before it goes live.
struct Pending {
    resources: ResourceGroup,
    session_cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Pending {
    /// The session loop is cancelled along with the start attempt.
    fn new(start_cancel: &CancellationToken) -> Self {
        Self {
            resources: ResourceGroup::new(),
            session_cancel: start_cancel.child_token(),
            task: None,
        }
    }

    async fn rollback(mut self, session_id: &str) {
        self.session_cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let failures = self.resources.release_all().await;
        if failures > 0 {
            tracing::warn!(session_id, failures, "rollback left resources unreleased");
        }
    }
}

/// Handles produced by a successful acquisition.
struct Acquired {
    scheduler: SharedScheduler,
    outbound: OutboundSender,
    events: EventSender,
    speaking: SpeakingNotifier,
    counters: Arc<SessionCounters>,
}

/// Returns the slot to `Idle` if a start attempt is dropped before it
/// finishes. Resources held by the attempt are released by their own `Drop`.
struct StartGuard {
    inner: Arc<Inner>,
    session_id: String,
    cancel: CancellationToken,
    armed: bool,
}

impl StartGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();

        let reset = {
            let mut slot = self.inner.slot.lock();
            let ours = matches!(
                &*slot,
                Slot::Starting { session_id, .. } if *session_id == self.session_id
            );
            if ours {
                *slot = Slot::Idle;
                self.inner.state_tx.send_replace(SessionState::Idle);
            }
            ours
        };
        if !reset {
            return;
        }

        tracing::warn!(session_id = %self.session_id, "start abandoned before completion, session reset to idle");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                inner.notify_state(SessionState::Idle).await;
            });
        }
    }
}

struct Inner {
    host: Arc<dyn AudioHost>,
    transport: Arc<dyn RealtimeTransport>,
    tools: ToolCallDispatcher,
    settings: SessionSettings,
    callbacks: RwLock<SessionCallbacks>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<SessionState>,
    last_stats: Mutex<Option<SessionStats>>,
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the microphone, both device contexts and the remote channel of the
/// current session.
///
/// Cheap to clone; clones share the same session slot.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("state", &self.state())
            .field("tools", &self.inner.tools)
            .finish()
    }
}

impl SessionLifecycleManager {
    pub fn new(
        host: Arc<dyn AudioHost>,
        transport: Arc<dyn RealtimeTransport>,
        tools: ToolCallDispatcher,
        settings: SessionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Inner {
                host,
                transport,
                tools,
                settings,
                callbacks: RwLock::new(SessionCallbacks::default()),
                slot: Mutex::new(Slot::Idle),
                state_tx,
                last_stats: Mutex::new(None),
            }),
        }
    }

    /// Replace the registered callbacks. Takes effect at the next `start()`,
    /// except `on_state_change`, which is read on every transition.
    pub fn set_callbacks(&self, callbacks: SessionCallbacks) {
        *self.inner.callbacks.write() = callbacks;
    }

    pub fn with_callbacks(self, callbacks: SessionCallbacks) -> Self {
        self.set_callbacks(callbacks);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether assistant audio is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        match &*self.inner.slot.lock() {
            Slot::Live(live) => live.speaking_flag.load(Ordering::SeqCst),
            _ => false,
        }
    }

    /// Stats of the live session, or of the last one that stopped.
    pub fn stats(&self) -> Option<SessionStats> {
        match &*self.inner.slot.lock() {
            Slot::Live(live) => Some(live.stats()),
            _ => *self.inner.last_stats.lock(),
        }
    }

    /// Id of the live session.
    pub fn session_id(&self) -> Option<String> {
        match &*self.inner.slot.lock() {
            Slot::Live(live) => Some(live.session_id.clone()),
            Slot::Starting { session_id, .. } => Some(session_id.clone()),
            _ => None,
        }
    }

    /// Start a session for `persona`.
    ///
    /// Only valid from `Idle`. Acquires the microphone first, then the capture
    /// and playback contexts, then opens the remote channel and waits for it to
    /// confirm readiness before capture begins. Any failure releases what was
    /// acquired and returns to `Idle`.
    pub async fn start(&self, persona: PersonaConfig) -> SessionResult<()> {
        let inner = &self.inner;
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        {
            let mut slot = inner.slot.lock();
            let state = slot.state();
            if state != SessionState::Idle {
                tracing::warn!(%state, "rejecting start while a session is active");
                return Err(SessionError::AlreadyActive(state));
            }
            *slot = Slot::Starting {
                session_id: session_id.clone(),
                cancel: cancel.clone(),
            };
            inner.state_tx.send_replace(SessionState::Starting);
        }
        let guard = StartGuard {
            inner: Arc::clone(inner),
            session_id: session_id.clone(),
            cancel: cancel.clone(),
            armed: true,
        };
        inner.notify_state(SessionState::Starting).await;
        tracing::info!(session_id = %session_id, persona = %persona.name, "starting voice session");

        let mut pending = Pending::new(&cancel);
        let acquired = match inner
            .acquire(&session_id, &persona, &cancel, &mut pending)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "voice session failed to start");
                pending.rollback(&session_id).await;
                inner.settle_idle().await;
                return Err(e);
            }
        };

        let outbound = acquired.outbound.clone();
        let speaking_flag = acquired.scheduler.lock().speaking_flag();
        let live = LiveSession {
            session_id: session_id.clone(),
            speaking_flag,
            resources: pending.resources,
            scheduler: acquired.scheduler,
            outbound: acquired.outbound,
            events: acquired.events,
            cancel: pending.session_cancel,
            task: pending.task,
            speaking: acquired.speaking,
            counters: acquired.counters,
        };

        let refused = {
            let mut slot = inner.slot.lock();
            if cancel.is_cancelled() {
                Some(live)
            } else {
                *slot = Slot::Live(live);
                inner.state_tx.send_replace(SessionState::Live);
                None
            }
        };
        if let Some(live) = refused {
            tracing::info!(session_id = %session_id, "voice session start cancelled");
            live.into_pending().rollback(&session_id).await;
            inner.settle_idle().await;
            return Err(SessionError::Cancelled);
        }
        guard.disarm();

        inner.notify_state(SessionState::Live).await;
        tracing::info!(session_id = %session_id, "voice session live");

        if let Some(prompt) = persona.opening_prompt.as_deref()
            && let Err(e) = outbound.send_text(prompt)
        {
            tracing::warn!(session_id = %session_id, error = %e, "failed to send opening prompt");
        }
        Ok(())
    }

    /// Stop the current session. Valid from any state and idempotent.
    ///
    /// Playback is silenced and `is_speaking` drops before any resource is
    /// released. Resources are released in acquisition order, each on a
    /// best-effort basis. A start in progress is cancelled and this waits for
    /// it to unwind.
    pub async fn stop(&self) {
        self.inner.stop_matching(None).await;
    }

    /// Send typed input on the live session.
    ///
    /// Never waits. The text also lands in the user transcript buffer.
    pub fn send_text(&self, text: &str) -> SessionResult<()> {
        let slot = self.inner.slot.lock();
        let Slot::Live(live) = &*slot else {
            return Err(SessionError::NotLive);
        };
        live.outbound.send_text(text)?;
        if let Err(e) = live.events.try_send(SessionEvent::LocalText(text.to_string())) {
            tracing::warn!(session_id = %live.session_id, error = %e, "typed text missing from transcript");
        }
        Ok(())
    }
}

impl Inner {
    async fn acquire(
        self: &Arc<Self>,
        session_id: &str,
        persona: &PersonaConfig,
        cancel: &CancellationToken,
        pending: &mut Pending,
    ) -> SessionResult<Acquired> {
        let settings = &self.settings;

        let microphone = until_cancelled(
            cancel,
            self.host.request_microphone(settings.capture_sample_rate),
        )
        .await??;
        pending
            .resources
            .push(OwnedResource::Microphone(Arc::clone(&microphone)));

        let capture = until_cancelled(
            cancel,
            self.host.open_capture_context(settings.capture_sample_rate),
        )
        .await??;
        pending
            .resources
            .push(OwnedResource::CaptureContext(Arc::clone(&capture)));

        let (events_tx, events_rx) = mpsc::channel(settings.event_queue_capacity.max(1));
        let device = until_cancelled(
            cancel,
            self.host.open_playback_context(
                settings.playback_sample_rate,
                source_ended_sender(events_tx.clone()),
            ),
        )
        .await??;
        let scheduler = PlaybackScheduler::new(device).into_shared();
        pending
            .resources
            .push(OwnedResource::Playback(Arc::clone(&scheduler)));

        let tools = if persona.tools_enabled {
            self.tools.clone()
        } else {
            ToolCallDispatcher::new(self.tools.timeout())
        };
        let setup = persona.session_setup(
            settings.model.as_deref(),
            settings.default_voice.as_deref(),
            &tools,
        );
        let channel = until_cancelled(cancel, self.transport.open(setup, events_tx.clone())).await??;
        let outbound = channel.outbound();
        pending.resources.push(OwnedResource::Channel(channel));

        let callbacks = self.callbacks.read().clone();
        let speaking = SpeakingNotifier::new(callbacks.on_vocal_intensity_change.clone());
        let counters = Arc::new(SessionCounters::default());
        let (ready_tx, ready_rx) = oneshot::channel();

        let session = VoiceSession::new(
            session_id.to_string(),
            Arc::clone(&scheduler),
            TranscriptAggregator::new(settings.voice_input_placeholder.clone()),
            tools,
            outbound.clone(),
            callbacks,
            speaking.clone(),
            Arc::clone(&counters),
        )
        .with_ready(ready_tx)
        .with_teardown_hook(self.teardown_hook(session_id));
        pending.task = Some(tokio::spawn(
            session.run(events_rx, pending.session_cancel.clone()),
        ));

        let handshake = settings.handshake_timeout;
        match until_cancelled(cancel, tokio::time::timeout(handshake, ready_rx)).await? {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(SessionError::Channel(e)),
            Ok(Err(_)) => return Err(SessionError::Channel(RealtimeError::ChannelClosed)),
            Err(_) => {
                return Err(SessionError::Channel(RealtimeError::Timeout(format!(
                    "no setup confirmation within {}ms",
                    handshake.as_millis()
                ))));
            }
        }

        capture.start_capture(
            microphone,
            settings.capture_frame_len,
            frame_sink(FrameEncoder::new(settings.capture_sample_rate), outbound.clone()),
        )?;
        tracing::debug!(session_id, "capture started");

        Ok(Acquired {
            scheduler,
            outbound,
            events: events_tx,
            speaking,
            counters,
        })
    }

    /// Called from the session loop when the remote side ends a live session.
    fn teardown_hook(self: &Arc<Self>, session_id: &str) -> super::TeardownHook {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let session_id = session_id.to_string();
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move {
                    inner.stop_matching(Some(&session_id)).await;
                });
            }
        })
    }

    /// Stop the current session, or only the session `only` names.
    async fn stop_matching(&self, only: Option<&str>) {
        let live = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Idle => return,
                Slot::Starting { session_id, cancel } => {
                    if only.is_some_and(|id| id != session_id) {
                        return;
                    }
                    cancel.cancel();
                    None
                }
                Slot::Stopping => {
                    if only.is_some() {
                        return;
                    }
                    None
                }
                Slot::Live(live) => {
                    if only.is_some_and(|id| id != live.session_id) {
                        return;
                    }
                    self.state_tx.send_replace(SessionState::Stopping);
                    match std::mem::replace(&mut *slot, Slot::Stopping) {
                        Slot::Live(live) => Some(live),
                        _ => None,
                    }
                }
            }
        };

        match live {
            Some(live) => self.teardown(live).await,
            None => {
                let mut state = self.state_tx.subscribe();
                let _ = state.wait_for(|s| *s == SessionState::Idle).await;
            }
        }
    }

    async fn teardown(&self, mut live: LiveSession) {
        self.notify_state(SessionState::Stopping).await;

        live.scheduler.lock().halt();
        live.speaking.set(false).await;
        live.cancel.cancel();

        let failures = live.resources.release_all().await;
        if let Some(task) = live.task.take() {
            task.abort();
        }

        let stats = live.stats();
        tracing::info!(
            session_id = %live.session_id,
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            chunks_scheduled = stats.chunks_scheduled,
            chunks_dropped = stats.chunks_dropped,
            tool_calls_answered = stats.tool_calls_answered,
            release_failures = failures,
            "voice session stopped"
        );
        *self.last_stats.lock() = Some(stats);
        drop(live);

        self.settle_idle().await;
    }

    async fn settle_idle(&self) {
        {
            *self.slot.lock() = Slot::Idle;
            self.state_tx.send_replace(SessionState::Idle);
        }
        self.notify_state(SessionState::Idle).await;
    }

    async fn notify_state(&self, state: SessionState) {
        tracing::debug!(%state, "session state changed");
        let callback = self.callbacks.read().on_state_change.clone();
        if let Some(cb) = callback {
            cb(state).await;
        }
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> SessionResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.capture_sample_rate, 16000);
        assert_eq!(settings.capture_frame_len, 4096);
        assert_eq!(settings.playback_sample_rate, 24000);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(15));
    }
}
