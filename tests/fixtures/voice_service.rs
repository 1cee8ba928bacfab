//! Mock voice service
//!
//! A one-connection WebSocket server. Every text frame the client sends is
//! forwarded to the test as JSON; the test pushes frames back through
//! [`MockVoiceService::send`].

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use keepsake_voice::core::realtime::ServerMessage;

/// What the client did.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(Value),
    Pong(Vec<u8>),
    Closed,
}

/// Upgrade request as seen by the server.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

pub struct MockVoiceService {
    pub url: String,
    pub handshake: Arc<Mutex<Option<Handshake>>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl MockVoiceService {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshake = Arc::new(Mutex::new(None));
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let seen = Arc::clone(&handshake);
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *seen.lock() = Some(Handshake {
                    path: request.uri().path().to_string(),
                    query: request.uri().query().map(str::to_string),
                    authorization: request
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                });
                Ok(response)
            };
            let Ok(ws) = accept_hdr_async(stream, callback).await else {
                return;
            };
            let (mut write, mut read) = ws.split();

            loop {
                tokio::select! {
                    Some(message) = outgoing_rx.recv() => {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                            let _ = inbound_tx.send(Inbound::Frame(value));
                        }
                        Some(Ok(Message::Pong(data))) => {
                            let _ = inbound_tx.send(Inbound::Pong(data.to_vec()));
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                            let _ = inbound_tx.send(Inbound::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            handshake,
            inbound,
            outgoing,
        }
    }

    pub fn send(&self, message: ServerMessage) {
        let json = serde_json::to_string(&message).unwrap();
        let _ = self.outgoing.send(Message::Text(json.into()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(Message::Text(text.to_string().into()));
    }

    pub fn ping(&self, payload: &[u8]) {
        let _ = self.outgoing.send(Message::Ping(payload.to_vec().into()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.outgoing.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        })));
    }

    /// Next thing the client did, or `None` after `WAIT`.
    pub async fn next(&mut self) -> Option<Inbound> {
        tokio::time::timeout(super::WAIT, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next pong payload, skipping text frames.
    pub async fn next_pong(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.next().await? {
                Inbound::Pong(data) => return Some(data),
                Inbound::Frame(_) => {}
                Inbound::Closed => return None,
            }
        }
    }

    /// Next frame whose `kind` is `kind`, skipping others.
    pub async fn next_kind(&mut self, kind: &str) -> Option<Value> {
        loop {
            match self.next().await? {
                Inbound::Frame(value) if value["kind"] == kind => return Some(value),
                Inbound::Frame(_) | Inbound::Pong(_) => {}
                Inbound::Closed => return None,
            }
        }
    }
}
