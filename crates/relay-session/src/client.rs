use std::sync::Arc;

use async_trait::async_trait;
use relay_core::errors::ClientError;
use relay_core::ids::Jid;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Connectivity change reported by the protocol client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open,
    Close { reason: Option<String> },
}

/// Notification pushed by the protocol client, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Connection(LifecycleEvent),
    /// Credentials changed and should be persisted.
    CredsUpdate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Unavailable,
}

/// Message payload. Opaque to the relay beyond its text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: Option<String>,
}

/// The account a session is logged in as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: Option<String>,
}

/// A live protocol client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Whether the stored credentials are already linked to an account.
    fn is_registered(&self) -> bool;

    /// The logged-in account, once the service has authenticated the session.
    fn user(&self) -> Option<AuthenticatedUser>;

    async fn request_pairing_code(
        &self,
        phone: &str,
        custom_code: Option<&str>,
    ) -> Result<String, ClientError>;

    async fn send_message(
        &self,
        to: &Jid,
        content: &MessageContent,
    ) -> Result<MessageReceipt, ClientError>;

    async fn send_presence_update(&self, presence: Presence) -> Result<(), ClientError>;

    /// Persist the current credentials.
    async fn save_credentials(&self) -> Result<(), ClientError>;

    /// End the session on the service side. Called once the connection has
    /// been replaced; the client is not used afterwards.
    async fn close(&self) -> Result<(), ClientError>;
}

/// A freshly initiated connection: the client plus its event stream.
pub struct Connection {
    pub client: Arc<dyn MessagingClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Establishes connections. Returning does not mean the session is open;
/// readiness arrives later as [`LifecycleEvent::Open`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, ClientError>;
}
