//! Operator interaction needed to pair a new device.

use std::io::{BufRead, Write};

use async_trait::async_trait;

use crate::errors::SessionError;

/// Front end that owns operator I/O during pairing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Ask for the phone number of the account to link. May block until
    /// a human answers.
    async fn ask_phone_number(&self, prompt: &str) -> Result<String, SessionError>;

    /// Display a pairing code for the operator to enter on their phone.
    async fn show_pairing_code(&self, code: &str);
}

/// Reads from stdin and writes to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsolePrompt;

#[async_trait]
impl OperatorPrompt for ConsolePrompt {
    async fn ask_phone_number(&self, prompt: &str) -> Result<String, SessionError> {
        let prompt = prompt.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;

            let mut answer = String::new();
            let _ = std::io::stdin().lock().read_line(&mut answer)?;
            Ok::<_, std::io::Error>(answer.trim().to_owned())
        })
        .await
        .map_err(|e| SessionError::Prompt(e.to_string()))?
        .map_err(|e| SessionError::Prompt(e.to_string()))
    }

    async fn show_pairing_code(&self, code: &str) {
        println!("Your pairing code: {code}");
    }
}
