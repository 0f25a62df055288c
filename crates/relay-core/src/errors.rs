use std::time::Duration;

/// Substrings that mark an error as a send timeout. The first matches
/// transport-level timeouts reported by the messaging client, the second
/// matches [`SendError::Timeout`] raised by the local deadline.
const TIMEOUT_MARKERS: [&str; 2] = ["timed out", "Send timeout"];

/// Errors reported by the messaging client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The remote service rejected the request; carries its message verbatim.
    #[error("{0}")]
    Remote(String),
    #[error("request timed out: {0}")]
    TimedOut(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::TimedOut(_) => "timed_out",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ConnectionClosed => "connection_closed",
        }
    }
}

/// Outcome of a failed delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The local deadline fired before the client settled.
    #[error("Send timeout")]
    Timeout { after: Duration },
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SendError {
    /// Whether this failure qualifies for the reconnect-and-retry path.
    ///
    /// Classification is by message text: the error counts as a timeout only
    /// if its rendered message contains `"timed out"` or `"Send timeout"`.
    pub fn is_timeout_class(&self) -> bool {
        let message = self.to_string();
        TIMEOUT_MARKERS.iter().any(|marker| message.contains(marker))
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Client(e) => e.error_kind(),
        }
    }
}
