use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use relay_core::errors::ClientError;
use relay_session::client::{Connection, Connector, MessagingClient};
use relay_settings::GatewaySettings;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, instrument, warn};

use crate::client::GatewayClient;
use crate::events::pump;
use crate::http::{execute, json};
use crate::wire::{CreateSessionRequest, CreateSessionResponse};

const EVENT_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub auth_dir: String,
    pub request_timeout: Duration,
}

impl From<&GatewaySettings> for GatewayConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            auth_dir: settings.auth_dir.clone(),
            request_timeout: settings.request_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Event socket URL for a session: same host, `ws`/`wss` scheme.
    pub fn events_url(&self, session_id: &str) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/sessions/{session_id}/events")
    }
}

/// Opens gateway sessions. Each connect creates a fresh session against the
/// persisted credentials and subscribes to its event socket.
pub struct GatewayConnector {
    config: GatewayConfig,
    http: reqwest::Client,
}

impl GatewayConnector {
    pub fn new(config: GatewayConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// `POST /sessions`: load or create credentials under the auth dir.
    pub async fn create_session(&self) -> Result<GatewayClient, ClientError> {
        let request = self
            .http
            .post(format!("{}/sessions", self.config.base_url))
            .json(&CreateSessionRequest {
                auth_dir: &self.config.auth_dir,
            });
        let reply: CreateSessionResponse = json(execute(request).await?).await?;

        Ok(GatewayClient::new(
            self.http.clone(),
            self.config.base_url.clone(),
            reply.session_id,
            reply.registered,
            reply.user.map(Into::into),
        ))
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    #[instrument(skip(self), fields(gateway = %self.config.base_url))]
    async fn connect(&self) -> Result<Connection, ClientError> {
        let client = Arc::new(self.create_session().await?);
        let url = self.config.events_url(client.session_id());

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(session_id = %client.session_id(), error = %close_err, "failed to close orphaned gateway session");
                }
                return Err(ClientError::Transport(format!("event socket: {e}")));
            }
        };
        info!(
            session_id = %client.session_id(),
            registered = client.is_registered(),
            "gateway session opened"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (mut sink, stream) = socket.split();
        let pumped = Arc::clone(&client);
        let _ = tokio::spawn(async move {
            pump(stream, Arc::clone(&pumped), tx).await;
            if let Err(e) = sink.close().await {
                debug!(session_id = %pumped.session_id(), error = %e, "event socket close failed");
            }
        });

        Ok(Connection {
            client,
            events: rx,
        })
    }
}
