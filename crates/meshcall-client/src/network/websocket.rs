use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::{ChatMessage, ClientMessage, PeerId, ServerMessage, SignalEnvelope, SignalPayload};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{SignalingChannel, SignalingError, SignalingEvent, SignalingEventReceiver, SignalingEventSender};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Signaling over a JSON WebSocket to the relay
pub struct WebSocketSignaling {
    local_peer_id: PeerId,
    sender: mpsc::Sender<ClientMessage>,
}

impl WebSocketSignaling {
    /// Connect and wait for the relay to assign our peer id
    pub async fn connect(url: &str) -> Result<(Self, SignalingEventReceiver), SignalingError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let welcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, read.next())
            .await
            .map_err(|_| SignalingError::Handshake("timed out waiting for welcome".to_string()))?;

        let local_peer_id = match welcome {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Welcome { peer_id } => peer_id,
                ServerMessage::Error { message } => return Err(SignalingError::Handshake(message)),
                other => {
                    return Err(SignalingError::Handshake(format!(
                        "unexpected first message: {:?}",
                        other
                    )));
                }
            },
            Some(Ok(other)) => {
                return Err(SignalingError::Handshake(format!("unexpected frame: {:?}", other)));
            }
            Some(Err(e)) => return Err(SignalingError::Connect(e.to_string())),
            None => return Err(SignalingError::Closed),
        };

        tracing::info!("Signaling connected as peer {}", local_peer_id);

        // Outgoing messages
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize signaling message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send signaling message");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Incoming messages
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => Self::handle_message(&event_tx, msg),
                        Err(e) => tracing::warn!("Ignoring malformed signaling message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling connection closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Signaling WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            let _ = event_tx.send(SignalingEvent::Disconnected);
        });

        // Keepalive
        let tx_ping = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx_ping.send(ClientMessage::Ping).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                local_peer_id,
                sender: tx,
            },
            event_rx,
        ))
    }

    fn handle_message(events: &SignalingEventSender, message: ServerMessage) {
        let event = match message {
            ServerMessage::UserJoined { peer_id, members } => {
                tracing::debug!("Peer {} joined, {} members in room", peer_id, members.len());
                SignalingEvent::PeerJoined { peer_id, members }
            }
            ServerMessage::UserLeft { peer_id } => {
                tracing::debug!("Peer {} left", peer_id);
                SignalingEvent::PeerLeft { peer_id }
            }
            ServerMessage::Signal { from, payload } => {
                match SignalEnvelope::from_payload(from.clone(), payload) {
                    Ok(envelopes) => {
                        for envelope in envelopes {
                            let _ = events.send(SignalingEvent::Signal(envelope));
                        }
                    }
                    Err(e) => tracing::warn!("Dropping signal from {}: {}", from, e),
                }
                return;
            }
            ServerMessage::ChatMessage {
                text,
                sender_name,
                sender_peer_id,
            } => SignalingEvent::Chat(ChatMessage {
                sender: sender_name,
                text,
                sender_peer_id,
            }),
            ServerMessage::Welcome { peer_id } => {
                tracing::warn!("Ignoring repeated welcome for peer {}", peer_id);
                return;
            }
            ServerMessage::Pong => return,
            ServerMessage::Error { message } => {
                tracing::error!("Signaling relay error: {}", message);
                return;
            }
        };

        let _ = events.send(event);
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), SignalingError> {
        self.sender.send(msg).await.map_err(|_| SignalingError::Closed)
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    async fn join(&self, room: &str) -> Result<(), SignalingError> {
        self.send(ClientMessage::JoinCall {
            room: room.to_string(),
        })
        .await
    }

    async fn send_signal(&self, target: &PeerId, payload: SignalPayload) -> Result<(), SignalingError> {
        self.send(ClientMessage::Signal {
            target: target.clone(),
            payload,
        })
        .await
    }

    async fn send_chat(&self, text: &str, sender_name: &str) -> Result<(), SignalingError> {
        self.send(ClientMessage::ChatMessage {
            text: text.to_string(),
            sender_name: sender_name.to_string(),
        })
        .await
    }

    async fn leave(&self) -> Result<(), SignalingError> {
        self.send(ClientMessage::Leave).await
    }
}
