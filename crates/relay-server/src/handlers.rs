//! HTTP handlers.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use relay_core::ids::Jid;
use relay_core::text::{digits_only, mask_phone};
use relay_session::client::MessageContent;
use relay_session::SupervisorState;
use relay_telemetry::metrics::{render, OTP_REQUESTS_TOTAL};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::server::AppState;

pub const MSG_MISSING_INPUT: &str = "Phone and OTP required";
pub const MSG_SENT: &str = "OTP sent successfully!";

/// Uniform JSON envelope for `/send-otp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SendOtpQuery {
    pub phone: Option<String>,
    pub otp: Option<String>,
}

/// `GET /send-otp?phone=…&otp=…`
pub async fn send_otp(
    State(state): State<AppState>,
    query: Result<Query<SendOtpQuery>, QueryRejection>,
) -> (StatusCode, Json<ApiResponse>) {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            counter!(OTP_REQUESTS_TOTAL, "outcome" => "invalid").increment(1);
            debug!(error = %rejection.body_text(), "unreadable otp query");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::fail(MSG_MISSING_INPUT)),
            );
        }
    };
    let phone = digits_only(query.phone.as_deref().unwrap_or_default());
    let otp = query.otp.unwrap_or_default();

    if phone.is_empty() || otp.is_empty() {
        counter!(OTP_REQUESTS_TOTAL, "outcome" => "invalid").increment(1);
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::fail(MSG_MISSING_INPUT)),
        );
    }

    let handle = match state.supervisor.authenticated_session() {
        Ok(handle) => handle,
        Err(e) => {
            counter!(OTP_REQUESTS_TOTAL, "outcome" => "not_connected").increment(1);
            warn!(phone = %mask_phone(&phone), "otp request while not connected");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::fail(e.to_string())),
            );
        }
    };

    let jid = Jid::from_phone(&phone, &state.send.jid_suffix);
    let content = MessageContent::text(state.send.render_message(&otp));
    info!(phone = %mask_phone(&phone), connection_id = %handle.id(), "sending otp");

    match state.sender.send(handle, &jid, &content).await {
        Ok(receipt) => {
            counter!(OTP_REQUESTS_TOTAL, "outcome" => "sent").increment(1);
            info!(
                phone = %mask_phone(&phone),
                message_id = receipt.message_id.as_deref().unwrap_or("-"),
                "otp sent"
            );
            (StatusCode::OK, Json(ApiResponse::ok(MSG_SENT)))
        }
        Err(e) => {
            counter!(OTP_REQUESTS_TOTAL, "outcome" => "failed").increment(1);
            error!(phone = %mask_phone(&phone), kind = e.error_kind(), error = %e, "failed to send otp");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::fail(e.to_string())),
            )
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub reconnects: u64,
}

/// `GET /health`: 200 while an authenticated session is open, else 503.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let supervisor_state = state.supervisor.state();
    let session = state.supervisor.authenticated_session().ok();
    let connected = supervisor_state == SupervisorState::Connected && session.is_some();

    let body = HealthResponse {
        status: if connected { "connected" } else { "disconnected" },
        state: supervisor_state.as_str(),
        connection_id: state
            .supervisor
            .current()
            .map(|handle| handle.id().to_string()),
        reconnects: state.supervisor.reconnect_count(),
    };
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// `GET /metrics`: Prometheus text, or 404 if no recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
