//! JSON bodies exchanged with the gateway sidecar.

use relay_session::client::{AuthenticatedUser, MessageContent, Presence};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest<'a> {
    pub auth_dir: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub user: Option<WireUser>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub jid: &'a str,
    pub content: &'a MessageContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PresenceRequest {
    pub presence: Presence,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeRequest<'a> {
    pub phone_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_code: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct PairingCodeResponse {
    pub code: String,
}

/// Error body; the gateway uses either key.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_text(self) -> Option<String> {
        self.error.or(self.message)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<WireUser> for AuthenticatedUser {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
        }
    }
}

/// Event frame pushed over the session socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum EventFrame {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    #[serde(rename = "creds.update")]
    CredsUpdate(CredsUpdate),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionStatus>,
    #[serde(default)]
    pub last_disconnect: Option<LastDisconnect>,
    #[serde(default)]
    pub user: Option<WireUser>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Open,
    Close,
    Connecting,
}

#[derive(Debug, Deserialize)]
pub struct LastDisconnect {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CredsUpdate {
    #[serde(default)]
    pub registered: Option<bool>,
}
