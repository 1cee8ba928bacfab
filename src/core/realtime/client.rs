//! WebSocket transport for the remote voice service.
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake_voice::core::realtime::{RealtimeTransport, SessionSetup, WebSocketTransport};
//!
//! let transport = WebSocketTransport::new("wss://voice.example.com/v1/live")
//!     .with_api_key(api_key);
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::channel(1024);
//! let mut channel = transport.open(SessionSetup::new("Be warm."), events_tx).await?;
//!
//! channel.outbound().send_text("Hello")?;
//! while let Some(event) = events_rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::base::{
    EventSender, OutboundSender, RealtimeError, RealtimeResult, RealtimeTransport, RemoteChannel,
    SessionSetup,
};
use super::messages::{ClientMessage, ServerMessage};
use crate::config::ApiKey;
use crate::core::session::SessionEvent;

/// Default outbound queue capacity.
pub const WS_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for the connection task to finish.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens one WebSocket connection per session.
#[derive(Clone)]
pub struct WebSocketTransport {
    endpoint: String,
    api_key: Option<ApiKey>,
    outbound_capacity: usize,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .field("outbound_capacity", &self.outbound_capacity)
            .finish()
    }
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            outbound_capacity: WS_CHANNEL_CAPACITY,
        }
    }

    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the WebSocket URL, appending the model as a query parameter.
    fn build_ws_url(&self, model: Option<&str>) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("endpoint: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }
        if let Some(model) = model
            && !url.query_pairs().any(|(k, _)| k == "model")
        {
            url.query_pairs_mut().append_pair("model", model);
        }
        Ok(url)
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn open(
        &self,
        setup: SessionSetup,
        events: EventSender,
    ) -> RealtimeResult<Box<dyn RemoteChannel>> {
        let url = self.build_ws_url(setup.model.as_deref())?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key.expose()))
                .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!(host = url.host_str().unwrap_or_default(), "connected to voice service");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Setup must be the first frame on the wire
        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;

        let (outbound, mut rx) = OutboundSender::channel(self.outbound_capacity);
        let cancel = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(true));

        let task_cancel = cancel.clone();
        let task_open = Arc::clone(&open);
        let handle = tokio::spawn(async move {
            let final_event = loop {
                tokio::select! {
                    biased;

                    _ = task_cancel.cancelled() => {
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            tracing::debug!("Failed to send close frame: {}", e);
                        }
                        break None;
                    }

                    // Handle outgoing messages
                    Some(message) = rx.recv() => {
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize {} message: {}", message.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break Some(SessionEvent::Errored(RealtimeError::WebSocketError(e.to_string())));
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(message) => {
                                        tracing::debug!(event = message.name(), "server event");
                                        if events.send(SessionEvent::from(message)).await.is_err() {
                                            tracing::debug!("Session event queue closed");
                                            break None;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse server event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("WebSocket closed by server");
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .filter(|r| !r.is_empty());
                                break Some(SessionEvent::Closed(reason));
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                tracing::warn!("Ignoring unexpected binary frame");
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break Some(SessionEvent::Errored(RealtimeError::WebSocketError(e.to_string())));
                            }
                            None => break Some(SessionEvent::Closed(None)),
                        }
                    }
                }
            };

            task_open.store(false, Ordering::SeqCst);
            if let Some(event) = final_event
                && !task_cancel.is_cancelled()
            {
                let _ = events.send(event).await;
            }
            tracing::info!("Voice service connection task ended");
        });

        Ok(Box::new(WebSocketChannel {
            outbound,
            cancel,
            open,
            handle: Some(handle),
        }))
    }
}

/// A live WebSocket connection.
struct WebSocketChannel {
    outbound: OutboundSender,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl RemoteChannel for WebSocketChannel {
    fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(CLOSE_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Connection task failed: {}", e),
            Err(_) => {
                tracing::warn!("Connection task did not stop in time, aborting");
                handle.abort();
            }
        }
        self.open.store(false, Ordering::SeqCst);

        tracing::info!("Disconnected from voice service");
        Ok(())
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
