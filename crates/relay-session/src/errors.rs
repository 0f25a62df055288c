use relay_core::errors::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session, or the session has no authenticated user yet.
    #[error("WhatsApp not connected")]
    NotConnected,
    #[error("operator prompt failed: {0}")]
    Prompt(String),
    #[error("operator entered no phone number digits")]
    EmptyPhoneNumber,
    #[error("supervisor is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Client(#[from] ClientError),
}
