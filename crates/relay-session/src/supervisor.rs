//! Connection supervisor.
//!
//! A single task owns the lifecycle of the messaging connection: it starts a
//! connection (pairing first if the credentials are fresh), consumes its
//! lifecycle events in order, runs the keep-alive timer while it is open and
//! re-establishes it after every close. Because one task does all of this,
//! two reconnects can never race each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use relay_core::ids::ConnectionId;
use relay_core::text::{digits_only, mask_phone};
use relay_settings::{ReconnectSettings, RelaySettings};
use relay_telemetry::metrics::{
    KEEPALIVE_FAILURES_TOTAL, SESSION_CONNECTED, SESSION_RECONNECTS_TOTAL,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::client::{ClientEvent, Connection, Connector, LifecycleEvent, MessagingClient, Presence};
use crate::errors::SessionError;
use crate::operator::OperatorPrompt;
use crate::sender::SessionSource;
use crate::session::SessionHandle;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub keep_alive_interval: Duration,
    pub ready_presence_delay: Duration,
    pub pairing_request_delay: Duration,
    pub pairing_custom_code: Option<String>,
    pub pairing_prompt: String,
    pub reconnect: ReconnectSettings,
}

impl From<&RelaySettings> for SupervisorConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            keep_alive_interval: Duration::from_millis(settings.keep_alive.interval_ms),
            ready_presence_delay: Duration::from_millis(
                settings.keep_alive.ready_presence_delay_ms,
            ),
            pairing_request_delay: Duration::from_millis(settings.pairing.request_delay_ms),
            pairing_custom_code: settings.pairing.custom_code.clone(),
            pairing_prompt: settings.pairing.prompt.clone(),
            reconnect: settings.reconnect.clone(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Connecting,
    AwaitingPairing,
    Connected,
    Backoff { attempt: u32 },
    Stopped,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Backoff { .. } => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
enum Signal {
    Stale {
        connection: ConnectionId,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug)]
enum ReconnectCause {
    Closed,
    StreamEnded,
    Stale,
    StartFailed,
}

impl ReconnectCause {
    fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::StreamEnded => "stream_ended",
            Self::Stale => "stale",
            Self::StartFailed => "start_failed",
        }
    }
}

/// Owns the current session and keeps it alive.
pub struct Supervisor {
    config: SupervisorConfig,
    current: RwLock<Option<Arc<SessionHandle>>>,
    state: watch::Sender<SupervisorState>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
    reconnects: AtomicU64,
}

/// Running supervisor task.
pub struct SupervisorTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SupervisorTask {
    /// Stop the supervisor and wait for it to wind down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(error = %e, "supervisor task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            current: RwLock::new(None),
            state: watch::Sender::new(SupervisorState::Idle),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Spawn the supervisor task. Can only be called once per supervisor.
    pub fn run(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
        prompt: Arc<dyn OperatorPrompt>,
    ) -> Result<SupervisorTask, SessionError> {
        let signals = self
            .signal_rx
            .lock()
            .take()
            .ok_or(SessionError::AlreadyRunning)?;
        let cancel = CancellationToken::new();
        let join = tokio::spawn(Arc::clone(self).supervise(
            connector,
            prompt,
            signals,
            cancel.clone(),
        ));
        Ok(SupervisorTask { cancel, join })
    }

    /// The current session, authenticated or not.
    pub fn current(&self) -> Option<Arc<SessionHandle>> {
        self.current.read().clone()
    }

    /// The current session if the service has logged it in.
    pub fn authenticated_session(&self) -> Result<Arc<SessionHandle>, SessionError> {
        self.current()
            .filter(|handle| handle.is_authenticated())
            .ok_or(SessionError::NotConnected)
    }

    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Re-establish attempts since start.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Flag a connection as unresponsive. Only acted on if `connection` is
    /// still the current one when the supervisor reads the report.
    pub fn report_stale(&self, connection: &ConnectionId, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(connection_id = %connection, %reason, "stale connection reported");
        let _ = self.signal_tx.send(Signal::Stale {
            connection: connection.clone(),
            reason,
        });
    }

    fn set_state(&self, state: SupervisorState) {
        debug!(state = state.as_str(), "supervisor state");
        let _ = self.state.send_replace(state);
    }

    fn install(&self, handle: Arc<SessionHandle>) {
        let previous = self.current.write().replace(handle);
        if let Some(previous) = previous {
            retire(&previous);
        }
    }

    fn teardown_current(&self) {
        let current = self.current.write().take();
        if let Some(handle) = current {
            retire(&handle);
        }
        gauge!(SESSION_CONNECTED).set(0.0);
    }

    async fn supervise(
        self: Arc<Self>,
        connector: Arc<dyn Connector>,
        prompt: Arc<dyn OperatorPrompt>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
        cancel: CancellationToken,
    ) {
        let mut backoff = ExponentialBackoff::from(&self.config.reconnect);

        loop {
            let started = tokio::select! {
                () = cancel.cancelled() => break,
                started = self.start(connector.as_ref(), prompt.as_ref()) => started,
            };

            let cause = match started {
                Ok((handle, events)) => {
                    match self
                        .drive(&handle, events, &mut signals, &mut backoff, &cancel)
                        .await
                    {
                        Some(cause) => cause,
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to start messaging connection");
                    ReconnectCause::StartFailed
                }
            };

            self.teardown_current();
            let _ = self.reconnects.fetch_add(1, Ordering::Relaxed);
            counter!(SESSION_RECONNECTS_TOTAL, "cause" => cause.as_str()).increment(1);

            let delay = backoff.next_delay();
            let attempt = backoff.attempts();
            self.set_state(SupervisorState::Backoff { attempt });
            info!(
                cause = cause.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "re-establishing messaging connection"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.teardown_current();
        self.set_state(SupervisorState::Stopped);
        info!("supervisor stopped");
    }

    async fn start(
        &self,
        connector: &dyn Connector,
        prompt: &dyn OperatorPrompt,
    ) -> Result<(Arc<SessionHandle>, mpsc::Receiver<ClientEvent>), SessionError> {
        self.set_state(SupervisorState::Connecting);
        info!("starting messaging connection");

        let Connection { client, events } = connector.connect().await?;
        let handle = Arc::new(SessionHandle::new(client));
        self.install(Arc::clone(&handle));
        debug!(connection_id = %handle.id(), "connection installed");

        if !handle.client().is_registered() {
            self.pair(&handle, prompt).await?;
            self.set_state(SupervisorState::Connecting);
        }

        Ok((handle, events))
    }

    async fn pair(&self, handle: &SessionHandle, prompt: &dyn OperatorPrompt) -> Result<(), SessionError> {
        self.set_state(SupervisorState::AwaitingPairing);
        info!(connection_id = %handle.id(), "credentials not registered, pairing required");

        let answer = prompt.ask_phone_number(&self.config.pairing_prompt).await?;
        let phone = digits_only(&answer);
        if phone.is_empty() {
            return Err(SessionError::EmptyPhoneNumber);
        }

        tokio::time::sleep(self.config.pairing_request_delay).await;
        let code = handle
            .client()
            .request_pairing_code(&phone, self.config.pairing_custom_code.as_deref())
            .await?;
        info!(phone = %mask_phone(&phone), "pairing code issued");
        prompt.show_pairing_code(&code).await;
        Ok(())
    }

    /// Consume events for one connection until it is lost (returns the
    /// cause) or the supervisor is cancelled (returns `None`).
    async fn drive(
        &self,
        handle: &Arc<SessionHandle>,
        mut events: mpsc::Receiver<ClientEvent>,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
        backoff: &mut ExponentialBackoff,
        cancel: &CancellationToken,
    ) -> Option<ReconnectCause> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                event = events.recv() => match event {
                    Some(ClientEvent::Connection(LifecycleEvent::Open)) => {
                        self.on_open(handle);
                        backoff.reset();
                    }
                    Some(ClientEvent::Connection(LifecycleEvent::Close { reason })) => {
                        warn!(
                            connection_id = %handle.id(),
                            reason = reason.as_deref().unwrap_or("unknown"),
                            "messaging connection closed"
                        );
                        return Some(ReconnectCause::Closed);
                    }
                    Some(ClientEvent::CredsUpdate) => spawn_save_credentials(Arc::clone(handle.client())),
                    None => {
                        warn!(connection_id = %handle.id(), "event stream ended");
                        return Some(ReconnectCause::StreamEnded);
                    }
                },
                Some(signal) = signals.recv() => match signal {
                    Signal::Stale { connection, reason } if &connection == handle.id() => {
                        warn!(connection_id = %connection, %reason, "connection stale, re-establishing");
                        return Some(ReconnectCause::Stale);
                    }
                    Signal::Stale { connection, .. } => {
                        debug!(connection_id = %connection, "ignoring stale report for superseded connection");
                    }
                },
            }
        }
    }

    fn on_open(&self, handle: &Arc<SessionHandle>) {
        handle.mark_open();

        let token = CancellationToken::new();
        handle.replace_keep_alive(token.clone());
        let _ = tokio::spawn(keep_alive(
            Arc::clone(handle.client()),
            handle.id().clone(),
            self.config.keep_alive_interval,
            token.clone(),
        ));
        gauge!(SESSION_CONNECTED).set(1.0);
        info!(connection_id = %handle.id(), "messaging connection open");

        spawn_save_credentials(Arc::clone(handle.client()));

        let _ = tokio::spawn(ready_presence(
            Arc::clone(handle.client()),
            self.config.ready_presence_delay,
            token,
        ));

        self.set_state(SupervisorState::Connected);
        info!("ready to send messages");
    }
}

impl SessionSource for Supervisor {
    fn current(&self) -> Option<Arc<SessionHandle>> {
        Supervisor::current(self)
    }

    fn report_stale(&self, connection: &ConnectionId, reason: &str) {
        Supervisor::report_stale(self, connection, reason);
    }
}

/// Mark a replaced handle closed and end its service-side session in the
/// background.
fn retire(handle: &SessionHandle) {
    handle.close();
    let client = Arc::clone(handle.client());
    let connection_id = handle.id().clone();
    let _ = tokio::spawn(async move {
        match client.close().await {
            Ok(()) => debug!(connection_id = %connection_id, "retired connection closed"),
            Err(e) => warn!(connection_id = %connection_id, error = %e, "failed to close retired connection"),
        }
    });
}

/// Saves run off the event loop; one can take a full gateway request timeout.
fn spawn_save_credentials(client: Arc<dyn MessagingClient>) {
    let _ = tokio::spawn(async move {
        match client.save_credentials().await {
            Ok(()) => info!("auth credentials saved"),
            Err(e) => warn!(error = %e, "failed to save auth credentials"),
        }
    });
}

/// Periodic presence ping. The first ping goes out one interval after open.
async fn keep_alive(
    client: Arc<dyn MessagingClient>,
    connection_id: ConnectionId,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => match client.send_presence_update(Presence::Available).await {
                Ok(()) => debug!(connection_id = %connection_id, "keep-alive ping sent"),
                Err(e) => {
                    counter!(KEEPALIVE_FAILURES_TOTAL).increment(1);
                    warn!(connection_id = %connection_id, error = %e, "keep-alive ping failed");
                }
            },
        }
    }
    debug!(connection_id = %connection_id, "keep-alive stopped");
}

async fn ready_presence(client: Arc<dyn MessagingClient>, delay: Duration, token: CancellationToken) {
    tokio::select! {
        () = token.cancelled() => {}
        () = tokio::time::sleep(delay) => {
            if let Err(e) = client.send_presence_update(Presence::Available).await {
                warn!(error = %e, "ready presence update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use relay_core::errors::ClientError;

    use super::*;
    use crate::mock::{MockClient, MockConnector, StaticPrompt};
    use crate::operator::MockOperatorPrompt;
    use crate::session::ConnectionState;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            reconnect: ReconnectSettings {
                initial_delay_ms: 500,
                max_delay_ms: 60_000,
                backoff_factor: 2.0,
                jitter_factor: 0.0,
            },
            ..SupervisorConfig::default()
        }
    }

    fn prompt() -> Arc<StaticPrompt> {
        Arc::new(StaticPrompt::new("628123456789"))
    }

    /// Let spawned tasks run to their next timer.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn wait_for_state(supervisor: &Supervisor, state: SupervisorState) {
        let mut rx = supervisor.subscribe_state();
        let _ = rx.wait_for(|s| *s == state).await.unwrap();
    }

    async fn open(connector: &MockConnector, index: usize) {
        assert!(
            connector
                .emit(index, ClientEvent::Connection(LifecycleEvent::Open))
                .await
        );
    }

    async fn close(connector: &MockConnector, index: usize) {
        assert!(
            connector
                .emit(
                    index,
                    ClientEvent::Connection(LifecycleEvent::Close {
                        reason: Some("stream errored".into()),
                    }),
                )
                .await
        );
    }

    async fn running(
        connector: Arc<MockConnector>,
    ) -> (Arc<Supervisor>, SupervisorTask) {
        let supervisor = Supervisor::new(config());
        let task = supervisor.run(connector.clone(), prompt()).unwrap();
        connector.wait_for_connect_calls(1).await;
        (supervisor, task)
    }

    #[tokio::test(start_paused = true)]
    async fn open_installs_session_and_keep_alive() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        assert!(supervisor.current().is_some());

        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;

        let handle = supervisor.current().unwrap();
        assert_eq!(handle.state(), ConnectionState::Open);
        assert!(handle.opened_at().is_some());
        assert!(handle.has_keep_alive());
        settle().await;
        assert_eq!(connector.connection(0).unwrap().client.creds_saves(), 1);
        assert!(supervisor.authenticated_session().is_ok());

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_pings_every_interval() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        let client = connector.connection(0).unwrap().client;

        // Ready presence after 2 s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.presence_calls(), 1);

        tokio::time::sleep(Duration::from_secs(118)).await;
        assert_eq!(client.presence_calls(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.presence_calls(), 3);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_failures_are_not_fatal() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        let client = connector.connection(0).unwrap().client;
        client.fail_presence(Some(ClientError::Transport("socket hung".into())));

        tokio::time::sleep(Duration::from_secs(500)).await;

        assert!(client.presence_calls() >= 4);
        assert_eq!(supervisor.state(), SupervisorState::Connected);
        assert_eq!(connector.connect_calls(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_open_replaces_keep_alive() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        open(&connector, 0).await;
        settle().await;
        let client = connector.connection(0).unwrap().client;

        tokio::time::sleep(Duration::from_secs(121)).await;

        // The first open's timers were cancelled by the second.
        assert_eq!(client.presence_calls(), 2);
        assert_eq!(client.creds_saves(), 2);
        assert!(supervisor.current().unwrap().has_keep_alive());

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_reconnects_with_new_handle() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        let first = supervisor.current().unwrap();

        close(&connector, 0).await;
        connector.wait_for_connect_calls(2).await;
        settle().await;

        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(!first.has_keep_alive());
        assert_eq!(connector.connection(0).unwrap().client.close_calls(), 1);
        let second = supervisor.current().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(supervisor.reconnect_count(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_stops_after_close() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        close(&connector, 0).await;
        connector.wait_for_connect_calls(2).await;

        let first = connector.connection(0).unwrap().client;
        tokio::time::sleep(Duration::from_secs(500)).await;

        assert_eq!(first.presence_calls(), 0);
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn every_close_triggers_one_reconnect() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;

        close(&connector, 0).await;
        connector.wait_for_connect_calls(2).await;
        close(&connector, 1).await;
        connector.wait_for_connect_calls(3).await;
        settle().await;

        assert_eq!(supervisor.reconnect_count(), 2);
        assert_eq!(connector.connect_calls(), 3);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_close_on_one_connection_reconnects_once() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;

        // Both closes are queued before the supervisor reads either one.
        let events = connector.connection(0).unwrap().events;
        for _ in 0..2 {
            events
                .try_send(ClientEvent::Connection(LifecycleEvent::Close { reason: None }))
                .unwrap();
        }

        connector.wait_for_connect_calls(2).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(connector.connect_calls(), 2);
        assert_eq!(supervisor.reconnect_count(), 1);
        assert_eq!(connector.connection(0).unwrap().client.close_calls(), 1);
        assert_eq!(connector.connection(1).unwrap().client.close_calls(), 0);
        assert!(events.is_closed());

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_clears_current() {
        let connector = Arc::new(MockConnector::registered());
        connector.fail_next(ClientError::Transport("refused".into()));
        let supervisor = Supervisor::new(SupervisorConfig {
            reconnect: ReconnectSettings {
                initial_delay_ms: 10_000,
                max_delay_ms: 10_000,
                backoff_factor: 1.0,
                jitter_factor: 0.0,
            },
            ..config()
        });
        let task = supervisor.run(connector.clone(), prompt()).unwrap();
        connector.wait_for_connect_calls(1).await;
        settle().await;

        assert!(supervisor.current().is_none());
        assert!(matches!(
            supervisor.authenticated_session(),
            Err(SessionError::NotConnected)
        ));
        assert_eq!(supervisor.state(), SupervisorState::Backoff { attempt: 1 });

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_back_off_exponentially() {
        let connector = Arc::new(MockConnector::registered());
        connector.fail_next(ClientError::Transport("refused".into()));
        connector.fail_next(ClientError::Transport("refused".into()));
        let started = Instant::now();

        let (supervisor, task) = running(connector.clone()).await;
        connector.wait_for_connect_calls(3).await;

        // 500 ms, then 1000 ms.
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(supervisor.reconnect_count(), 2);
        settle().await;
        assert!(supervisor.current().is_some());

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_open() {
        let connector = Arc::new(MockConnector::registered());
        connector.fail_next(ClientError::Transport("refused".into()));
        connector.fail_next(ClientError::Transport("refused".into()));
        let (supervisor, task) = running(connector.clone()).await;
        connector.wait_for_connect_calls(3).await;

        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        close(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Backoff { attempt: 1 }).await;

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_report_for_current_connection_reconnects() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        let first = supervisor.current().unwrap();

        supervisor.report_stale(first.id(), "Send timeout");
        connector.wait_for_connect_calls(2).await;
        settle().await;

        assert_eq!(first.state(), ConnectionState::Closed);
        assert_eq!(supervisor.reconnect_count(), 1);
        assert_eq!(connector.connection(0).unwrap().client.close_calls(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_report_for_superseded_connection_is_ignored() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        let first = supervisor.current().unwrap();

        close(&connector, 0).await;
        connector.wait_for_connect_calls(2).await;
        open(&connector, 1).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;

        supervisor.report_stale(first.id(), "Send timeout");
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.connect_calls(), 2);
        assert_eq!(supervisor.reconnect_count(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Connected);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn creds_update_saves_credentials() {
        let connector = Arc::new(MockConnector::registered());
        let (_supervisor, task) = running(connector.clone()).await;

        assert!(connector.emit(0, ClientEvent::CredsUpdate).await);
        settle().await;

        assert_eq!(connector.connection(0).unwrap().client.creds_saves(), 1);
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_credential_save_does_not_block_events() {
        let connector = Arc::new(MockConnector::new(|_| {
            MockClient::registered().with_creds_delay(Duration::from_secs(30))
        }));
        let (supervisor, task) = running(connector.clone()).await;
        let started = Instant::now();

        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let first = supervisor.current().unwrap();
        supervisor.report_stale(first.id(), "Send timeout");
        connector.wait_for_connect_calls(2).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(supervisor.reconnect_count(), 1);
        assert_eq!(connector.connection(0).unwrap().client.creds_saves(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_client_pairs_through_prompt() {
        let connector = Arc::new(MockConnector::new(|_| {
            MockClient::unregistered().with_pairing_code("ABCD1234")
        }));
        let shown = Arc::new(Mutex::new(Vec::new()));
        let mut prompt = MockOperatorPrompt::new();
        let _ = prompt
            .expect_ask_phone_number()
            .times(1)
            .returning(|_| Ok("+62 812-3456-789".to_string()));
        let captured = Arc::clone(&shown);
        let _ = prompt
            .expect_show_pairing_code()
            .times(1)
            .returning(move |code| captured.lock().push(code.to_string()));

        let supervisor = Supervisor::new(config());
        let task = supervisor.run(connector.clone(), Arc::new(prompt)).unwrap();
        connector.wait_for_connect_calls(1).await;
        wait_for_state(&supervisor, SupervisorState::AwaitingPairing).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let client = connector.connection(0).unwrap().client;
        assert_eq!(
            client.pairing_requests(),
            vec![("628123456789".to_string(), Some("SPMBDIGI".to_string()))]
        );
        assert_eq!(*shown.lock(), vec!["ABCD1234".to_string()]);
        assert_eq!(supervisor.state(), SupervisorState::Connecting);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_waits_before_requesting_code() {
        let connector = Arc::new(MockConnector::new(|_| MockClient::unregistered()));
        let supervisor = Supervisor::new(config());
        let task = supervisor.run(connector.clone(), prompt()).unwrap();
        connector.wait_for_connect_calls(1).await;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let client = connector.connection(0).unwrap().client;
        assert!(client.pairing_requests().is_empty());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(client.pairing_requests().len(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_phone_number_fails_start_and_retries() {
        let connector = Arc::new(MockConnector::new(|_| MockClient::unregistered()));
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let mut prompt = MockOperatorPrompt::new();
        let _ = prompt.expect_ask_phone_number().returning(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            Ok("no digits here".to_string())
        });

        let supervisor = Supervisor::new(config());
        let task = supervisor.run(connector.clone(), Arc::new(prompt)).unwrap();
        connector.wait_for_connect_calls(2).await;
        settle().await;

        assert!(asked.load(Ordering::SeqCst) >= 2);
        assert!(connector
            .connection(0)
            .unwrap()
            .client
            .pairing_requests()
            .is_empty());

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_and_clears_session() {
        let connector = Arc::new(MockConnector::registered());
        let (supervisor, task) = running(connector.clone()).await;
        open(&connector, 0).await;
        wait_for_state(&supervisor, SupervisorState::Connected).await;
        let handle = supervisor.current().unwrap();

        task.shutdown().await;
        settle().await;

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.current().is_none());
        assert!(!handle.has_keep_alive());
        assert_eq!(connector.connection(0).unwrap().client.close_calls(), 1);
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let connector = Arc::new(MockConnector::registered());
        let supervisor = Supervisor::new(config());
        let task = supervisor.run(connector.clone(), prompt()).unwrap();

        assert!(matches!(
            supervisor.run(connector, prompt()),
            Err(SessionError::AlreadyRunning)
        ));
        task.shutdown().await;
    }

    #[test]
    fn config_follows_settings() {
        let mut settings = RelaySettings::default();
        settings.keep_alive.interval_ms = 30_000;
        settings.pairing.custom_code = None;

        let config = SupervisorConfig::from(&settings);

        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.ready_presence_delay, Duration::from_secs(2));
        assert_eq!(config.pairing_request_delay, Duration::from_secs(2));
        assert!(config.pairing_custom_code.is_none());
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_string(&SupervisorState::Backoff { attempt: 3 }).unwrap();
        assert_eq!(json, r#"{"state":"backoff","attempt":3}"#);
    }
}
