use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::errors::ClientError;
use relay_core::ids::Jid;
use relay_session::client::{
    AuthenticatedUser, MessageContent, MessageReceipt, MessagingClient, Presence,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::http::{execute, json, map_transport};
use crate::wire::{
    PairingCodeRequest, PairingCodeResponse, PresenceRequest, SendMessageRequest,
    SendMessageResponse,
};

/// One gateway session, driven over REST.
///
/// Registration and user identity start from the session-creation reply
/// and are then kept current by the event socket.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
    registered: AtomicBool,
    user: RwLock<Option<AuthenticatedUser>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session_id: impl Into<String>,
        registered: bool,
        user: Option<AuthenticatedUser>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.into(),
            registered: AtomicBool::new(registered),
            user: RwLock::new(user),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub(crate) fn set_user(&self, user: Option<AuthenticatedUser>) {
        *self.user.write() = user;
    }

    fn url(&self, action: &str) -> String {
        format!("{}/sessions/{}/{action}", self.base_url, self.session_id)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<reqwest::Response, ClientError> {
        debug!(session_id = %self.session_id, action, "gateway request");
        execute(self.http.post(self.url(action)).json(body)).await
    }
}

#[async_trait]
impl MessagingClient for GatewayClient {
    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn user(&self) -> Option<AuthenticatedUser> {
        self.user.read().clone()
    }

    #[instrument(skip_all, fields(session_id = %self.session_id))]
    async fn request_pairing_code(
        &self,
        phone: &str,
        custom_code: Option<&str>,
    ) -> Result<String, ClientError> {
        let body = PairingCodeRequest {
            phone_number: phone,
            custom_code,
        };
        let response = self.post("pairing-code", &body).await?;
        let reply: PairingCodeResponse = json(response).await?;
        Ok(reply.code)
    }

    async fn send_message(
        &self,
        to: &Jid,
        content: &MessageContent,
    ) -> Result<MessageReceipt, ClientError> {
        let body = SendMessageRequest {
            jid: to.as_str(),
            content,
        };
        let response = self.post("messages", &body).await?;
        let bytes = response.bytes().await.map_err(map_transport)?;
        let reply = if bytes.is_empty() {
            SendMessageResponse::default()
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::InvalidResponse(e.to_string()))?
        };
        Ok(MessageReceipt {
            message_id: reply.message_id,
        })
    }

    async fn send_presence_update(&self, presence: Presence) -> Result<(), ClientError> {
        let _ = self.post("presence", &PresenceRequest { presence }).await?;
        Ok(())
    }

    async fn save_credentials(&self) -> Result<(), ClientError> {
        let _ = self.post("creds", &serde_json::json!({})).await?;
        Ok(())
    }

    /// `DELETE /sessions/{id}`: drop the gateway session and its socket.
    async fn close(&self) -> Result<(), ClientError> {
        debug!(session_id = %self.session_id, "closing gateway session");
        let url = format!("{}/sessions/{}", self.base_url, self.session_id);
        let _ = execute(self.http.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> GatewayClient {
        GatewayClient::new(reqwest::Client::new(), server.uri(), "s1", true, None)
    }

    fn jid() -> Jid {
        Jid::from_phone("628123456789", "s.whatsapp.net")
    }

    #[tokio::test]
    async fn send_message_posts_jid_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/messages"))
            .and(body_json(json!({
                "jid": "628123456789@s.whatsapp.net",
                "content": { "text": "Kode OTP kamu adalah: 42 jangan bagikan ke siapapun!" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": "3EB0" })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client(&server)
            .send_message(
                &jid(),
                &MessageContent::text("Kode OTP kamu adalah: 42 jangan bagikan ke siapapun!"),
            )
            .await
            .unwrap();

        assert_eq!(receipt.message_id.as_deref(), Some("3EB0"));
    }

    #[tokio::test]
    async fn empty_send_reply_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/messages"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let receipt = client(&server)
            .send_message(&jid(), &MessageContent::text("x"))
            .await
            .unwrap();
        assert!(receipt.message_id.is_none());
    }

    #[tokio::test]
    async fn error_body_becomes_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/messages"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "error": "not-authorized" })),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .send_message(&jid(), &MessageContent::text("x"))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Remote("not-authorized".into()));
        assert_eq!(err.to_string(), "not-authorized");
    }

    #[tokio::test]
    async fn plain_text_error_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_presence_update(Presence::Available)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Remote("upstream down".into()));
    }

    #[tokio::test]
    async fn slow_gateway_maps_to_timed_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let client = GatewayClient::new(http, server.uri(), "s1", true, None);

        let err = client
            .send_message(&jid(), &MessageContent::text("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::TimedOut(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn pairing_code_sends_custom_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/pairing-code"))
            .and(body_json(json!({ "phoneNumber": "628123", "customCode": "SPMBDIGI" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "SPMBDIGI" })))
            .expect(1)
            .mount(&server)
            .await;

        let code = client(&server)
            .request_pairing_code("628123", Some("SPMBDIGI"))
            .await
            .unwrap();
        assert_eq!(code, "SPMBDIGI");
    }

    #[tokio::test]
    async fn presence_and_creds_hit_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/presence"))
            .and(body_json(json!({ "presence": "available" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/creds"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.send_presence_update(Presence::Available).await.unwrap();
        client.save_credentials().await.unwrap();
    }

    #[tokio::test]
    async fn close_deletes_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/sessions/s1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).close().await.unwrap();
    }

    #[tokio::test]
    async fn close_of_unknown_session_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "session not found" })),
            )
            .mount(&server)
            .await;

        let err = client(&server).close().await.unwrap_err();
        assert_eq!(err, ClientError::Remote("session not found".into()));
    }

    #[test]
    fn identity_updates_are_visible() {
        let client = GatewayClient::new(reqwest::Client::new(), "http://gw/", "s1", false, None);
        assert!(!client.is_registered());
        assert!(client.user().is_none());

        client.set_registered(true);
        client.set_user(Some(AuthenticatedUser {
            id: "628@s.whatsapp.net".into(),
            name: None,
        }));

        assert!(client.is_registered());
        assert_eq!(client.user().unwrap().id, "628@s.whatsapp.net");
        assert_eq!(client.url("messages"), "http://gw/sessions/s1/messages");
    }
}
