use relay_core::errors::ClientError;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::wire::ErrorBody;

/// Map a transport failure. Timeouts keep "timed out" in their message so
/// the send path treats them as stale-connection symptoms.
pub(crate) fn map_transport(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::TimedOut(e.to_string())
    } else {
        ClientError::Transport(e.to_string())
    }
}

/// Send a request and turn non-2xx answers into [`ClientError::Remote`].
pub(crate) async fn execute(request: RequestBuilder) -> Result<Response, ClientError> {
    let response = request.send().await.map_err(map_transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.map_err(map_transport)?;
    let text = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_text)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("gateway returned {status}")
            } else {
                body
            }
        });
    Err(ClientError::Remote(text))
}

pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await.map_err(map_transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
