//! Fake remote transport
//!
//! Opens in-memory channels. Tests inject service events with
//! [`FakeTransport::emit_server`] and read what the session sent with
//! [`FakeTransport::drain_outbound`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use keepsake_voice::core::realtime::{
    ClientMessage, EventSender, OutboundSender, RealtimeError, RealtimeResult, RealtimeTransport,
    RemoteChannel, ServerMessage, SessionSetup,
};
use keepsake_voice::core::session::SessionEvent;

use super::devices::ResourceLog;

#[derive(Default)]
pub struct TransportState {
    pub log: ResourceLog,
    pub auto_open: AtomicBool,
    pub fail_open: Mutex<Option<RealtimeError>>,
    pub setups: Mutex<Vec<SessionSetup>>,
    pub events: Mutex<Option<EventSender>>,
    pub outbound_rx: Mutex<Option<mpsc::Receiver<ClientMessage>>>,
    pub opens: Mutex<usize>,
}

/// Fake [`RealtimeTransport`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakeTransport {
    pub state: Arc<TransportState>,
}

impl FakeTransport {
    /// Transport that reports readiness as soon as it opens.
    pub fn new(log: ResourceLog) -> Self {
        let transport = Self::manual(log);
        transport.state.auto_open.store(true, Ordering::SeqCst);
        transport
    }

    /// Transport that waits for the test to emit `setupComplete`.
    pub fn manual(log: ResourceLog) -> Self {
        Self {
            state: Arc::new(TransportState {
                log,
                ..Default::default()
            }),
        }
    }

    pub fn fail_open(&self, error: RealtimeError) {
        *self.state.fail_open.lock() = Some(error);
    }

    pub fn opens(&self) -> usize {
        *self.state.opens.lock()
    }

    /// Whether a channel has been handed its event queue.
    pub fn connected(&self) -> bool {
        self.state.events.lock().is_some()
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.state.setups.lock().clone()
    }

    pub fn last_setup(&self) -> Option<SessionSetup> {
        self.state.setups.lock().last().cloned()
    }

    /// Inject an event as the channel would. False once the session is gone.
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let events = self.state.events.lock().clone();
        match events {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn emit_server(&self, message: ServerMessage) -> bool {
        self.emit(SessionEvent::from(message)).await
    }

    /// Everything queued for the service so far.
    pub fn drain_outbound(&self) -> Vec<ClientMessage> {
        let mut drained = Vec::new();
        if let Some(rx) = self.state.outbound_rx.lock().as_mut() {
            while let Ok(message) = rx.try_recv() {
                drained.push(message);
            }
        }
        drained
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn open(
        &self,
        setup: SessionSetup,
        events: EventSender,
    ) -> RealtimeResult<Box<dyn RemoteChannel>> {
        *self.state.opens.lock() += 1;
        self.state.setups.lock().push(setup);

        let failure = self.state.fail_open.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }

        let (outbound, rx) = OutboundSender::channel(64);
        *self.state.outbound_rx.lock() = Some(rx);
        *self.state.events.lock() = Some(events.clone());
        self.state.log.lock().push("acquire:channel".to_string());

        if self.state.auto_open.load(Ordering::SeqCst) {
            let _ = events.send(SessionEvent::Opened).await;
        }

        Ok(Box::new(FakeChannel {
            log: Arc::clone(&self.state.log),
            outbound,
            open: true,
        }))
    }
}

struct FakeChannel {
    log: ResourceLog,
    outbound: OutboundSender,
    open: bool,
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        if self.open {
            self.open = false;
            self.log.lock().push("release:channel".to_string());
        }
        Ok(())
    }
}
