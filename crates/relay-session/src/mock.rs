//! Scripted client, connector and prompt for deterministic tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use relay_core::errors::ClientError;
use relay_core::ids::Jid;
use tokio::sync::{mpsc, watch};

use crate::client::{
    AuthenticatedUser, ClientEvent, Connection, Connector, MessageContent, MessageReceipt,
    MessagingClient, Presence,
};
use crate::errors::SessionError;
use crate::operator::OperatorPrompt;

/// Pre-programmed outcome of one `send_message` call.
#[derive(Clone, Debug)]
pub enum MockSend {
    Ok,
    Fail(ClientError),
    /// Never settles.
    Hang,
    /// Wait a duration, then resolve the inner outcome.
    Delay(Duration, Box<MockSend>),
}

impl MockSend {
    pub fn delayed(delay: Duration, inner: MockSend) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Messaging client that replays queued send outcomes. Once the queue is
/// empty every send succeeds.
pub struct MockClient {
    registered: AtomicBool,
    user: RwLock<Option<AuthenticatedUser>>,
    sends: Mutex<VecDeque<MockSend>>,
    send_calls: AtomicUsize,
    delivered: Mutex<Vec<(Jid, MessageContent)>>,
    presence_calls: AtomicUsize,
    presence_error: Mutex<Option<ClientError>>,
    creds_saves: AtomicUsize,
    creds_delay: Option<Duration>,
    close_calls: AtomicUsize,
    pairing_code: String,
    pairing_requests: Mutex<Vec<(String, Option<String>)>>,
}

impl MockClient {
    fn with_state(registered: bool, user: Option<AuthenticatedUser>) -> Self {
        Self {
            registered: AtomicBool::new(registered),
            user: RwLock::new(user),
            sends: Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
            presence_calls: AtomicUsize::new(0),
            presence_error: Mutex::new(None),
            creds_saves: AtomicUsize::new(0),
            creds_delay: None,
            close_calls: AtomicUsize::new(0),
            pairing_code: "MOCKCODE".to_string(),
            pairing_requests: Mutex::new(Vec::new()),
        }
    }

    /// Registered and logged in.
    pub fn registered() -> Self {
        Self::with_state(
            true,
            Some(AuthenticatedUser {
                id: "6280000000000:1@s.whatsapp.net".to_string(),
                name: Some("relay".to_string()),
            }),
        )
    }

    /// Fresh credentials that still need pairing.
    pub fn unregistered() -> Self {
        Self::with_state(false, None)
    }

    pub fn with_sends(self, sends: impl IntoIterator<Item = MockSend>) -> Self {
        self.sends.lock().extend(sends);
        self
    }

    pub fn with_pairing_code(mut self, code: impl Into<String>) -> Self {
        self.pairing_code = code.into();
        self
    }

    /// Make every credentials save take `delay` before succeeding.
    pub fn with_creds_delay(mut self, delay: Duration) -> Self {
        self.creds_delay = Some(delay);
        self
    }

    pub fn push_send(&self, send: MockSend) {
        self.sends.lock().push_back(send);
    }

    pub fn set_user(&self, user: Option<AuthenticatedUser>) {
        *self.user.write() = user;
    }

    pub fn fail_presence(&self, error: Option<ClientError>) {
        *self.presence_error.lock() = error;
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(Jid, MessageContent)> {
        self.delivered.lock().clone()
    }

    pub fn presence_calls(&self) -> usize {
        self.presence_calls.load(Ordering::SeqCst)
    }

    pub fn creds_saves(&self) -> usize {
        self.creds_saves.load(Ordering::SeqCst)
    }

    pub fn pairing_requests(&self) -> Vec<(String, Option<String>)> {
        self.pairing_requests.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for MockClient {
    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn user(&self) -> Option<AuthenticatedUser> {
        self.user.read().clone()
    }

    async fn request_pairing_code(
        &self,
        phone: &str,
        custom_code: Option<&str>,
    ) -> Result<String, ClientError> {
        self.pairing_requests
            .lock()
            .push((phone.to_string(), custom_code.map(str::to_string)));
        Ok(self.pairing_code.clone())
    }

    async fn send_message(
        &self,
        to: &Jid,
        content: &MessageContent,
    ) -> Result<MessageReceipt, ClientError> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst);
        let mut outcome = self.sends.lock().pop_front().unwrap_or(MockSend::Ok);
        loop {
            match outcome {
                MockSend::Ok => {
                    self.delivered.lock().push((to.clone(), content.clone()));
                    return Ok(MessageReceipt {
                        message_id: Some(format!("mock-{call}")),
                    });
                }
                MockSend::Fail(e) => return Err(e),
                MockSend::Hang => return std::future::pending().await,
                MockSend::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
            }
        }
    }

    async fn send_presence_update(&self, _presence: Presence) -> Result<(), ClientError> {
        let _ = self.presence_calls.fetch_add(1, Ordering::SeqCst);
        match self.presence_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn save_credentials(&self) -> Result<(), ClientError> {
        let _ = self.creds_saves.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.creds_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        let _ = self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One connection handed out by [`MockConnector`].
#[derive(Clone)]
pub struct MockConnection {
    pub client: Arc<MockClient>,
    pub events: mpsc::Sender<ClientEvent>,
}

/// Connector that builds a fresh [`MockClient`] per connect and lets the
/// test push lifecycle events into each connection.
pub struct MockConnector {
    factory: Box<dyn Fn(usize) -> MockClient + Send + Sync>,
    failures: Mutex<VecDeque<ClientError>>,
    connections: Mutex<Vec<MockConnection>>,
    calls: watch::Sender<usize>,
}

impl MockConnector {
    /// `factory` receives the zero-based connect call index.
    pub fn new(factory: impl Fn(usize) -> MockClient + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            failures: Mutex::new(VecDeque::new()),
            connections: Mutex::new(Vec::new()),
            calls: watch::Sender::new(0),
        }
    }

    pub fn registered() -> Self {
        Self::new(|_| MockClient::registered())
    }

    /// Make the next connect call fail with `error`.
    pub fn fail_next(&self, error: ClientError) {
        self.failures.lock().push_back(error);
    }

    /// Total connect calls, including failed ones.
    pub fn connect_calls(&self) -> usize {
        *self.calls.borrow()
    }

    pub async fn wait_for_connect_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|calls| *calls >= n).await;
    }

    /// Successful connections, oldest first.
    pub fn connection(&self, index: usize) -> Option<MockConnection> {
        self.connections.lock().get(index).cloned()
    }

    pub fn latest(&self) -> Option<MockConnection> {
        self.connections.lock().last().cloned()
    }

    /// Push an event into a connection. Returns false if the supervisor
    /// already dropped that connection.
    pub async fn emit(&self, index: usize, event: ClientEvent) -> bool {
        let Some(conn) = self.connection(index) else {
            return false;
        };
        conn.events.send(event).await.is_ok()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, ClientError> {
        let index = *self.calls.borrow();
        let failure = self.failures.lock().pop_front();
        let result = match failure {
            Some(e) => Err(e),
            None => {
                let client = Arc::new((self.factory)(index));
                let (tx, rx) = mpsc::channel(32);
                self.connections.lock().push(MockConnection {
                    client: Arc::clone(&client),
                    events: tx,
                });
                Ok(Connection { client, events: rx })
            }
        };
        self.calls.send_modify(|calls| *calls += 1);
        result
    }
}

/// Prompt that always answers with the same phone number.
pub struct StaticPrompt {
    phone: String,
    asked: AtomicUsize,
    shown: Mutex<Vec<String>>,
}

impl StaticPrompt {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            asked: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    pub fn shown_codes(&self) -> Vec<String> {
        self.shown.lock().clone()
    }
}

#[async_trait]
impl OperatorPrompt for StaticPrompt {
    async fn ask_phone_number(&self, _prompt: &str) -> Result<String, SessionError> {
        let _ = self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.phone.clone())
    }

    async fn show_pairing_code(&self, code: &str) {
        self.shown.lock().push(code.to_string());
    }
}
