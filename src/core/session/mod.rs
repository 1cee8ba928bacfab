//! Voice session orchestration.
//!
//! # Architecture
//!
//! ```text
//!  microphone ──► CaptureContext ──► frame_sink ──► FrameEncoder ──► OutboundSender ──► remote
//!                                                                                       │
//!  remote ──► RemoteChannel reader ─┐                                                   │
//!  playback completions ────────────┼──► SessionEvent queue ──► VoiceSession::run       │
//!  SessionLifecycleManager::send_text ┘        │                                        │
//!                                              ├─► PlaybackScheduler                    │
//!                                              ├─► TranscriptAggregator                 │
//!                                              └─► ToolCallDispatcher ──► tool responses ┘
//! ```
//!
//! One task consumes the event queue, so every handler sees events in the
//! order they arrived. [`SessionLifecycleManager`] owns the resources and the
//! `Idle → Starting → Live → Stopping → Idle` state machine.

mod callbacks;
mod events;
mod lifecycle;
mod persona;
mod resources;

pub use callbacks::{
    MessageCommittedCallback, SessionCallbacks, SessionErrorCallback, StateChangeCallback,
    ToolEvent, ToolEventCallback, TranscriptDeltaCallback, TranscriptUpdate,
    VocalIntensityCallback,
};
pub use events::{SessionEvent, source_ended_sender};
pub use lifecycle::{SessionLifecycleManager, SessionSettings, SessionState};
pub use persona::PersonaConfig;
pub use resources::{OwnedResource, ResourceGroup};

pub(crate) use callbacks::SpeakingNotifier;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::audio::{CaptureFrame, FrameEncoder, PlaybackChunk};
use crate::core::device::{DeviceError, FrameSink};
use crate::core::playback::SharedScheduler;
use crate::core::realtime::{
    OutboundSender, OutboundStats, RealtimeError, RealtimeResult, TranscriptRole,
};
use crate::core::tools::{ToolCallDispatcher, ToolCallRequest};
use crate::core::transcript::TranscriptAggregator;

/// Wire capture frames straight into the outbound queue.
///
/// Runs on the capture thread: encodes and `try_send`s, never blocks.
pub fn frame_sink(encoder: FrameEncoder, outbound: OutboundSender) -> FrameSink {
    Arc::new(move |frame: CaptureFrame| {
        let blob = encoder.encode(&frame);
        if outbound.send_audio(blob) {
            tracing::trace!(samples = frame.samples.len(), "audio frame queued");
        }
    })
}

// =============================================================================
// Stats
// =============================================================================

/// Counters kept by the session loop.
#[derive(Debug, Default)]
pub struct SessionCounters {
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    tool_calls_answered: AtomicU64,
}

/// Point-in-time view of one session's traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub tool_calls_answered: u64,
}

impl SessionStats {
    pub fn collect(outbound: &OutboundStats, counters: &SessionCounters) -> Self {
        Self {
            frames_sent: outbound.frames_sent(),
            frames_dropped: outbound.frames_dropped(),
            chunks_scheduled: counters.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: counters.chunks_dropped.load(Ordering::Relaxed),
            tool_calls_answered: counters.tool_calls_answered.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Event Loop
// =============================================================================

/// Invoked once when the remote side errors or closes a live session.
pub type TeardownHook = Box<dyn FnOnce() + Send + Sync>;

enum Flow {
    Continue,
    Exit,
    Teardown,
}

/// The single consumer of a session's event queue.
pub struct VoiceSession {
    session_id: String,
    scheduler: SharedScheduler,
    transcript: TranscriptAggregator,
    tools: ToolCallDispatcher,
    outbound: OutboundSender,
    callbacks: SessionCallbacks,
    speaking: SpeakingNotifier,
    counters: Arc<SessionCounters>,
    ready: Option<oneshot::Sender<RealtimeResult<()>>>,
    on_teardown: Option<TeardownHook>,
    opened: bool,
    next_sequence: u64,
}

impl VoiceSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: String,
        scheduler: SharedScheduler,
        transcript: TranscriptAggregator,
        tools: ToolCallDispatcher,
        outbound: OutboundSender,
        callbacks: SessionCallbacks,
        speaking: SpeakingNotifier,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            session_id,
            scheduler,
            transcript,
            tools,
            outbound,
            callbacks,
            speaking,
            counters,
            ready: None,
            on_teardown: None,
            opened: false,
            next_sequence: 0,
        }
    }

    /// Resolve `ready` when the remote side confirms the setup, or with the
    /// error that ended the handshake.
    pub(crate) fn with_ready(mut self, ready: oneshot::Sender<RealtimeResult<()>>) -> Self {
        self.ready = Some(ready);
        self
    }

    pub(crate) fn with_teardown_hook(mut self, hook: TeardownHook) -> Self {
        self.on_teardown = Some(hook);
        self
    }

    /// Consume events until cancelled, the queue closes, or the remote side
    /// ends the session.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>, cancel: CancellationToken) {
        tracing::debug!(session_id = %self.session_id, "session loop started");

        loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        tracing::debug!(session_id = %self.session_id, "session event queue closed");
                        break;
                    }
                },
            };

            match self.handle_event(event).await {
                Flow::Continue => {}
                Flow::Exit => break,
                Flow::Teardown => {
                    if !cancel.is_cancelled()
                        && let Some(hook) = self.on_teardown.take()
                    {
                        hook();
                    }
                    break;
                }
            }
        }

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(RealtimeError::ChannelClosed));
        }
        tracing::debug!(session_id = %self.session_id, "session loop exited");
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Flow {
        tracing::debug!(session_id = %self.session_id, event = event.name(), "routing event");

        match event {
            SessionEvent::Opened => {
                self.opened = true;
                tracing::info!(session_id = %self.session_id, "voice session ready");
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }

            SessionEvent::Interrupted => {
                self.scheduler.lock().flush();
                tracing::debug!(session_id = %self.session_id, "playback interrupted");
                self.sync_speaking().await;
            }

            SessionEvent::TranscriptDelta { role, text } => {
                self.transcript.append(role, &text);
                if let Some(cb) = &self.callbacks.on_transcript_delta {
                    cb(TranscriptUpdate { role, text }).await;
                }
            }

            SessionEvent::LocalText(text) => {
                self.transcript.append(TranscriptRole::User, &text);
            }

            SessionEvent::TurnComplete => {
                if let Some(pair) = self.transcript.commit() {
                    tracing::debug!(session_id = %self.session_id, "turn committed");
                    if let Some(cb) = &self.callbacks.on_message_committed {
                        cb(pair).await;
                    }
                }
            }

            SessionEvent::AudioDelta { mime, rate, data } => {
                self.schedule_audio(&mime, rate, &data);
                self.sync_speaking().await;
            }

            SessionEvent::SourceEnded(id) => {
                self.scheduler.lock().complete(id);
                self.sync_speaking().await;
            }

            SessionEvent::ToolCall(requests) => {
                self.answer_tool_calls(requests).await;
            }

            SessionEvent::Errored(error) => {
                if !self.opened {
                    tracing::error!(session_id = %self.session_id, error = %error, "voice session failed during handshake");
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Err(error));
                    }
                    return Flow::Exit;
                }
                tracing::error!(session_id = %self.session_id, error = %error, "voice session error");
                if let Some(cb) = &self.callbacks.on_error {
                    cb(error).await;
                }
                return Flow::Teardown;
            }

            SessionEvent::Closed(reason) => {
                if !self.opened {
                    let detail = reason.unwrap_or_else(|| "closed during handshake".to_string());
                    tracing::warn!(session_id = %self.session_id, reason = %detail, "voice service closed before ready");
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Err(RealtimeError::ConnectionFailed(detail)));
                    }
                    return Flow::Exit;
                }
                tracing::info!(
                    session_id = %self.session_id,
                    reason = reason.as_deref().unwrap_or(""),
                    "voice service closed the session"
                );
                return Flow::Teardown;
            }
        }

        Flow::Continue
    }

    fn schedule_audio(&mut self, mime: &str, rate: Option<u32>, data: &str) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let chunk = match PlaybackChunk::decode(mime, rate, data, sequence) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(session_id = %self.session_id, sequence, error = %e, "dropping undecodable audio chunk");
                return;
            }
        };

        let result = self.scheduler.lock().enqueue(chunk);
        match result {
            Ok(_) => {
                self.counters.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
            }
            Err(DeviceError::Closed) => {
                self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(session_id = %self.session_id, sequence, "playback halted, dropping chunk");
            }
            Err(e) => {
                self.counters.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(session_id = %self.session_id, sequence, error = %e, "failed to schedule audio chunk");
            }
        }
    }

    async fn answer_tool_calls(&mut self, requests: Vec<ToolCallRequest>) {
        for request in requests {
            let response = self.tools.handle(&request).await;

            if let Some(cb) = &self.callbacks.on_tool_event {
                cb(ToolEvent {
                    request: request.clone(),
                    response: response.clone(),
                })
                .await;
            }

            match self.outbound.send_tool_response(response).await {
                Ok(()) => {
                    self.counters
                        .tool_calls_answered
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        tool = %request.name,
                        call_id = %request.id,
                        error = %e,
                        "dropping tool response, channel closed"
                    );
                }
            }
        }
    }

    async fn sync_speaking(&self) {
        let speaking = self.scheduler.lock().is_speaking();
        self.speaking.set(speaking).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::FrameEncoder;
    use crate::core::device::{DeviceResult, PlaybackDevice, SourceId};
    use crate::core::playback::PlaybackScheduler;
    use crate::core::realtime::ClientMessage;
    use crate::core::transcript::MessagePair;
    use base64::prelude::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct StillDevice;

    impl PlaybackDevice for StillDevice {
        fn sample_rate(&self) -> u32 {
            1000
        }
        fn now(&self) -> f64 {
            0.0
        }
        fn schedule(&mut self, _id: SourceId, _samples: Arc<[f32]>, _start_at: f64) -> DeviceResult<()> {
            Ok(())
        }
        fn stop_source(&mut self, _id: SourceId) -> DeviceResult<()> {
            Ok(())
        }
        fn close(&mut self) -> DeviceResult<()> {
            Ok(())
        }
    }

    struct Harness {
        events: mpsc::Sender<SessionEvent>,
        outbound: mpsc::Receiver<ClientMessage>,
        scheduler: SharedScheduler,
        committed: Arc<Mutex<Vec<MessagePair>>>,
        speaking: Arc<Mutex<Vec<bool>>>,
        counters: Arc<SessionCounters>,
        ready: oneshot::Receiver<RealtimeResult<()>>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_session() -> Harness {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (outbound, outbound_rx) = OutboundSender::channel(64);
        let scheduler = PlaybackScheduler::new(Box::new(StillDevice)).into_shared();
        let committed = Arc::new(Mutex::new(Vec::new()));
        let speaking = Arc::new(Mutex::new(Vec::new()));

        let committed_sink = Arc::clone(&committed);
        let speaking_sink = Arc::clone(&speaking);
        let on_committed: MessageCommittedCallback = Arc::new(move |pair: MessagePair| {
            let sink = Arc::clone(&committed_sink);
            Box::pin(async move { sink.lock().push(pair) })
        });
        let on_speaking: VocalIntensityCallback = Arc::new(move |on: bool| {
            let sink = Arc::clone(&speaking_sink);
            Box::pin(async move { sink.lock().push(on) })
        });
        let callbacks = SessionCallbacks {
            on_message_committed: Some(on_committed),
            on_vocal_intensity_change: Some(on_speaking),
            ..Default::default()
        };
        let notifier = SpeakingNotifier::new(callbacks.on_vocal_intensity_change.clone());
        let counters = Arc::new(SessionCounters::default());
        let (ready_tx, ready_rx) = oneshot::channel();

        let session = VoiceSession::new(
            "test".to_string(),
            Arc::clone(&scheduler),
            TranscriptAggregator::default(),
            ToolCallDispatcher::default(),
            outbound,
            callbacks,
            notifier,
            Arc::clone(&counters),
        )
        .with_ready(ready_tx);
        let task = tokio::spawn(session.run(events_rx, CancellationToken::new()));

        Harness {
            events: events_tx,
            outbound: outbound_rx,
            scheduler,
            committed,
            speaking,
            counters,
            ready: ready_rx,
            task,
        }
    }

    fn audio(seconds: f64) -> SessionEvent {
        let samples = vec![0.0f32; (seconds * 1000.0) as usize];
        SessionEvent::AudioDelta {
            mime: "audio/pcm;rate=1000".to_string(),
            rate: None,
            data: FrameEncoder::encode_samples(&samples),
        }
    }

    #[tokio::test]
    async fn test_opened_resolves_ready() {
        let h = spawn_session();
        h.events.send(SessionEvent::Opened).await.unwrap();
        assert!(h.ready.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_error_before_open_fails_handshake() {
        let h = spawn_session();
        h.events
            .send(SessionEvent::Errored(RealtimeError::ProviderError("bad key".to_string())))
            .await
            .unwrap();
        let result = h.ready.await.unwrap();
        assert!(matches!(result, Err(RealtimeError::ProviderError(_))));
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_routing_and_commit() {
        let h = spawn_session();
        for event in [
            SessionEvent::Opened,
            SessionEvent::TranscriptDelta {
                role: TranscriptRole::User,
                text: "hi ".to_string(),
            },
            SessionEvent::LocalText("there".to_string()),
            SessionEvent::TranscriptDelta {
                role: TranscriptRole::Assistant,
                text: "hello".to_string(),
            },
            audio(0.5),
            audio(0.25),
            SessionEvent::TurnComplete,
        ] {
            h.events.send(event).await.unwrap();
        }
        drop(h.events);
        h.task.await.unwrap();

        let committed = h.committed.lock().clone();
        assert_eq!(
            committed,
            vec![MessagePair {
                user: "hi there".to_string(),
                ai: "hello".to_string()
            }]
        );
        let sources = h.scheduler.lock().active_sources();
        assert_eq!(sources.len(), 2);
        assert!((sources[1].start_at - 0.5).abs() < 1e-9);
        assert_eq!(*h.speaking.lock(), vec![true]);
        assert_eq!(h.counters.chunks_scheduled.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_interrupt_and_bad_chunk() {
        let h = spawn_session();
        h.events.send(SessionEvent::Opened).await.unwrap();
        h.events.send(audio(1.0)).await.unwrap();
        h.events
            .send(SessionEvent::AudioDelta {
                mime: "audio/mpeg".to_string(),
                rate: None,
                data: BASE64_STANDARD.encode([0u8, 0]),
            })
            .await
            .unwrap();
        h.events.send(SessionEvent::Interrupted).await.unwrap();
        drop(h.events);
        h.task.await.unwrap();

        assert_eq!(h.scheduler.lock().active_count(), 0);
        assert_eq!(h.scheduler.lock().next_start_time(), 0.0);
        assert_eq!(*h.speaking.lock(), vec![true, false]);
        assert_eq!(h.counters.chunks_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_are_always_answered() {
        let mut h = spawn_session();
        h.events.send(SessionEvent::Opened).await.unwrap();
        h.events
            .send(SessionEvent::ToolCall(vec![
                ToolCallRequest {
                    id: "a".to_string(),
                    name: "missing".to_string(),
                    args: json!({}),
                },
                ToolCallRequest {
                    id: "b".to_string(),
                    name: "also_missing".to_string(),
                    args: json!("{not json"),
                },
            ]))
            .await
            .unwrap();
        drop(h.events);
        h.task.await.unwrap();

        let mut ids = Vec::new();
        while let Ok(message) = h.outbound.try_recv() {
            if let ClientMessage::ToolResponse { id, result, .. } = message {
                assert!(result.get("error").is_some());
                ids.push(id);
            }
        }
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(h.counters.tool_calls_answered.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_close_after_open_runs_teardown_hook() {
        let (events_tx, events_rx) = mpsc::channel(8);
        let (outbound, _outbound_rx) = OutboundSender::channel(8);
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);

        let session = VoiceSession::new(
            "hook".to_string(),
            PlaybackScheduler::new(Box::new(StillDevice)).into_shared(),
            TranscriptAggregator::default(),
            ToolCallDispatcher::default(),
            outbound,
            SessionCallbacks::default(),
            SpeakingNotifier::new(None),
            Arc::new(SessionCounters::default()),
        )
        .with_teardown_hook(Box::new(move || *flag.lock() = true));
        let task = tokio::spawn(session.run(events_rx, CancellationToken::new()));

        events_tx.send(SessionEvent::Opened).await.unwrap();
        events_tx
            .send(SessionEvent::Closed(Some("bye".to_string())))
            .await
            .unwrap();
        task.await.unwrap();
        assert!(*fired.lock());
    }

    #[test]
    fn test_session_loop_can_be_spawned() {
        fn assert_send<T: Send + 'static>(_: &T) {}

        let (_events_tx, events_rx) = mpsc::channel(1);
        let (outbound, _outbound_rx) = OutboundSender::channel(1);
        let session = VoiceSession::new(
            "send".to_string(),
            PlaybackScheduler::new(Box::new(StillDevice)).into_shared(),
            TranscriptAggregator::default(),
            ToolCallDispatcher::default(),
            outbound,
            SessionCallbacks::default(),
            SpeakingNotifier::new(None),
            Arc::new(SessionCounters::default()),
        )
        .with_teardown_hook(Box::new(|| {}));

        let run = session.run(events_rx, CancellationToken::new());
        assert_send(&run);
    }

    #[test]
    fn test_frame_sink_encodes_and_counts() {
        let (outbound, mut rx) = OutboundSender::channel(1);
        let stats = outbound.stats();
        let sink = frame_sink(FrameEncoder::new(16000), outbound);

        sink(CaptureFrame::silence(4, 16000));
        sink(CaptureFrame::silence(4, 16000));

        assert!(matches!(rx.try_recv(), Ok(ClientMessage::Audio { rate: 16000, .. })));
        assert_eq!(stats.frames_sent(), 1);
        assert_eq!(stats.frames_dropped(), 1);
        let snapshot = SessionStats::collect(&stats, &SessionCounters::default());
        assert_eq!(snapshot.frames_dropped, 1);
    }
}
