//! Deadline-bounded message delivery with a single retry.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use relay_core::errors::{ClientError, SendError};
use relay_core::ids::{ConnectionId, Jid};
use relay_settings::SendSettings;
use relay_telemetry::metrics::{OTP_SEND_DURATION_SECONDS, OTP_SEND_RETRIES_TOTAL};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{MessageContent, MessageReceipt};
use crate::session::SessionHandle;

/// Where the sender looks up the live session and reports dead ones.
pub trait SessionSource: Send + Sync {
    fn current(&self) -> Option<Arc<SessionHandle>>;

    /// Ask for `connection` to be torn down and re-established.
    fn report_stale(&self, connection: &ConnectionId, reason: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendPolicy {
    /// Deadline for each attempt.
    pub timeout: Duration,
    /// Pause between a timed-out first attempt and the retry.
    pub retry_grace: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(8_000),
            retry_grace: Duration::from_millis(3_000),
        }
    }
}

impl From<&SendSettings> for SendPolicy {
    fn from(settings: &SendSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            retry_grace: settings.retry_grace(),
        }
    }
}

/// One try at delivering a message.
#[derive(Clone, Debug)]
pub struct SendAttempt {
    pub destination: Jid,
    pub payload: MessageContent,
    pub deadline: Instant,
    /// 1 for the first try, 2 for the retry.
    pub attempt: u8,
}

pub struct ResilientSender {
    source: Arc<dyn SessionSource>,
    policy: SendPolicy,
}

impl ResilientSender {
    pub fn new(source: Arc<dyn SessionSource>, policy: SendPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> SendPolicy {
        self.policy
    }

    /// Deliver `content` to `to` through `handle`.
    ///
    /// A first failure that looks like a timeout flags the connection as
    /// stale, waits the grace period and tries once more, preferring
    /// whichever authenticated session is current by then. Any other
    /// failure, and whatever the retry returns, is final.
    pub async fn send(
        &self,
        handle: Arc<SessionHandle>,
        to: &Jid,
        content: &MessageContent,
    ) -> Result<MessageReceipt, SendError> {
        let err = match self.attempt(&handle, to, content, 1).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) if e.is_timeout_class() => e,
            Err(e) => return Err(e),
        };

        warn!(
            connection_id = %handle.id(),
            error = %err,
            grace_ms = self.policy.retry_grace.as_millis() as u64,
            "send timed out, reconnecting and retrying once"
        );
        counter!(OTP_SEND_RETRIES_TOTAL).increment(1);
        self.source.report_stale(handle.id(), &err.to_string());

        tokio::time::sleep(self.policy.retry_grace).await;

        let retry_handle = self
            .source
            .current()
            .filter(|current| current.is_authenticated())
            .unwrap_or(handle);
        debug!(connection_id = %retry_handle.id(), "retrying send");
        self.attempt(&retry_handle, to, content, 2).await
    }

    async fn attempt(
        &self,
        handle: &SessionHandle,
        to: &Jid,
        content: &MessageContent,
        attempt: u8,
    ) -> Result<MessageReceipt, SendError> {
        let started = Instant::now();
        let request = SendAttempt {
            destination: to.clone(),
            payload: content.clone(),
            deadline: started + self.policy.timeout,
            attempt,
        };

        let result = run_attempt(handle, request).await;
        let result = match result {
            Some(result) => result,
            None => Err(SendError::Timeout {
                after: self.policy.timeout,
            }),
        };

        let label = if attempt == 1 { "first" } else { "retry" };
        histogram!(OTP_SEND_DURATION_SECONDS, "attempt" => label)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => info!(connection_id = %handle.id(), attempt, "message delivered"),
            Err(e) => debug!(attempt, kind = e.error_kind(), error = %e, "send attempt failed"),
        }
        result
    }
}

/// Race one send against its deadline. `None` means the deadline won; the
/// send keeps running in its own task and its result is dropped.
async fn run_attempt(
    handle: &SessionHandle,
    request: SendAttempt,
) -> Option<Result<MessageReceipt, SendError>> {
    let client = Arc::clone(handle.client());
    let SendAttempt {
        destination,
        payload,
        deadline,
        ..
    } = request;

    let task = tokio::spawn(async move { client.send_message(&destination, &payload).await });

    match tokio::time::timeout_at(deadline, task).await {
        Ok(Ok(result)) => Some(result.map_err(SendError::from)),
        Ok(Err(join_err)) => Some(Err(SendError::Client(ClientError::Transport(format!(
            "send task failed: {join_err}"
        ))))),
        Err(_) => None,
    }
}
