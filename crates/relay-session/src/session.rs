use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use relay_core::ids::ConnectionId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::MessagingClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// One external connection and its liveness timer.
///
/// Only the supervisor changes a handle's state. A reconnect creates a new
/// handle instead of reviving a closed one.
pub struct SessionHandle {
    id: ConnectionId,
    client: Arc<dyn MessagingClient>,
    state: RwLock<ConnectionState>,
    opened_at: RwLock<Option<DateTime<Utc>>>,
    keep_alive: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn new(client: Arc<dyn MessagingClient>) -> Self {
        Self {
            id: ConnectionId::new(),
            client,
            state: RwLock::new(ConnectionState::Connecting),
            opened_at: RwLock::new(None),
            keep_alive: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn client(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        *self.opened_at.read()
    }

    /// Whether the service has logged this session in.
    pub fn is_authenticated(&self) -> bool {
        self.client.user().is_some()
    }

    pub fn has_keep_alive(&self) -> bool {
        self.keep_alive
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    pub(crate) fn mark_open(&self) {
        *self.state.write() = ConnectionState::Open;
        *self.opened_at.write() = Some(Utc::now());
    }

    /// Install a new keep-alive token, cancelling the previous one.
    pub(crate) fn replace_keep_alive(&self, token: CancellationToken) {
        if let Some(previous) = self.keep_alive.lock().replace(token) {
            previous.cancel();
        }
    }

    /// Cancel the keep-alive and mark the handle closed.
    pub(crate) fn close(&self) {
        if let Some(token) = self.keep_alive.lock().take() {
            token.cancel();
        }
        *self.state.write() = ConnectionState::Closed;
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(token) = self.keep_alive.get_mut().take() {
            token.cancel();
        }
    }
}
