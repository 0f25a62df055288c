//! Translation of the gateway's event socket into [`ClientEvent`]s.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use relay_session::client::{ClientEvent, LifecycleEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::client::GatewayClient;
use crate::wire::{ConnectionStatus, EventFrame};

/// Decode one text frame. Updates the client's identity as a side effect.
///
/// Returns `None` for frames that carry no lifecycle meaning.
pub fn translate(client: &GatewayClient, text: &str) -> Option<ClientEvent> {
    let frame = match serde_json::from_str::<EventFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "malformed gateway event frame");
            return None;
        }
    };

    match frame {
        EventFrame::ConnectionUpdate(update) => match update.connection {
            Some(ConnectionStatus::Open) => {
                if let Some(user) = update.user {
                    client.set_user(Some(user.into()));
                }
                Some(ClientEvent::Connection(LifecycleEvent::Open))
            }
            Some(ConnectionStatus::Close) => {
                Some(ClientEvent::Connection(LifecycleEvent::Close {
                    reason: update.last_disconnect.and_then(|d| d.error),
                }))
            }
            Some(ConnectionStatus::Connecting) | None => None,
        },
        EventFrame::CredsUpdate(update) => {
            if let Some(registered) = update.registered {
                client.set_registered(registered);
            }
            Some(ClientEvent::CredsUpdate)
        }
        EventFrame::Unknown => None,
    }
}

/// Forward socket frames until the socket ends, then report a close.
///
/// Returns as soon as the receiving side is gone, even while the socket is
/// idle, so the caller can shut the socket down.
pub async fn pump<S>(mut socket: S, client: Arc<GatewayClient>, events: mpsc::Sender<ClientEvent>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            () = events.closed() => {
                debug!(session_id = %client.session_id(), "event receiver dropped");
                return;
            }
            next = socket.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => break Some(e.to_string()),
            None => break Some("event socket ended".to_string()),
        };

        let event = match message {
            Message::Text(text) => translate(&client, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => translate(&client, text),
                Err(_) => {
                    warn!(len = data.len(), "non-UTF-8 binary event frame");
                    None
                }
            },
            Message::Close(frame) => {
                break Some(
                    frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "event socket closed".to_string()),
                )
            }
            _ => None,
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!(session_id = %client.session_id(), "event receiver dropped");
                return;
            }
        }
    };

    debug!(session_id = %client.session_id(), ?reason, "event socket finished");
    let _ = events
        .send(ClientEvent::Connection(LifecycleEvent::Close { reason }))
        .await;
}
