use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::{interval_at, sleep, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{
    events::{ConnectNotice, ConnectionObserver, NoopObserver},
    state::{BackoffSchedule, ConnectionState, Link},
};
use crate::{
    config::ConnectionConfig,
    db::{ConnectionEvent, ConnectionEventKind, Database},
    error::{SessionError, StartupError},
    session::{FieldId, FieldValue, SessionClient, SessionFactory},
    utils::{suppressed_suffix, FaultThrottle},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub read_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub health_check_interval: Duration,
    pub backoff: BackoffSchedule,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            backoff: BackoffSchedule::default(),
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            backoff: BackoffSchedule::from_secs(&config.backoff_secs),
            ..Self::default()
        }
    }
}

/// Runs `call` under `limit`, folding an elapsed deadline into a timeout error.
async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, SessionError>
where
    F: std::future::Future<Output = Result<T, SessionError>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

/// Read-side view of the lifecycle manager. Cheap to clone; never blocks on
/// reconnection.
#[derive(Clone)]
pub struct HandleSource {
    link: watch::Receiver<Link>,
    nudge: Arc<Notify>,
    read_timeout: Duration,
}

impl HandleSource {
    /// The live session, or `None` when not connected.
    pub fn acquire_handle(&self) -> Option<SessionHandle> {
        let link = self.link.borrow();
        match (link.state, &link.handle) {
            (ConnectionState::Connected, Some(session)) => Some(SessionHandle {
                session: Arc::clone(session),
                read_timeout: self.read_timeout,
            }),
            _ => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.borrow().state
    }

    /// Failed reconnection tries in the current outage.
    pub fn attempt(&self) -> u32 {
        self.link.borrow().attempt
    }

    /// Ask for an immediate health probe after a transport fault. Ignored
    /// unless the session is believed to be up.
    pub fn report_fault(&self) {
        if self.state() == ConnectionState::Connected {
            self.nudge.notify_one();
        }
    }

    pub async fn wait_for_state(&self, wanted: ConnectionState) -> Result<()> {
        let mut link = self.link.clone();
        link.wait_for(|current| current.state == wanted)
            .await
            .context("connection manager dropped")?;
        Ok(())
    }
}

/// A session borrowed for one tick. Reads are bounded by the read timeout.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<dyn SessionClient>,
    read_timeout: Duration,
}

impl SessionHandle {
    pub async fn read(&self, field: &FieldId) -> Result<FieldValue, SessionError> {
        bounded("read", self.read_timeout, self.session.read_field(field)).await
    }
}

enum HealthOutcome {
    Cancelled,
    Lost(String),
}

/// Sole owner of the connection state. Everything that changes the link runs
/// on this struct, first inline during `start()` and then on its own task.
struct Supervisor {
    factory: Arc<dyn SessionFactory>,
    settings: ConnectionSettings,
    store: Database,
    observer: Arc<dyn ConnectionObserver>,
    link: watch::Sender<Link>,
    nudge: Arc<Notify>,
    session: Option<Arc<dyn SessionClient>>,
    attempt: u32,
    last_disconnect: Option<Instant>,
    throttle: FaultThrottle,
}

impl Supervisor {
    fn endpoint(&self) -> &str {
        self.factory.endpoint()
    }

    fn publish(&self, state: ConnectionState) {
        let handle = match state {
            ConnectionState::Connected => self.session.clone(),
            _ => None,
        };
        let attempt = self.attempt;
        self.link.send_replace(Link {
            state,
            handle,
            attempt,
        });
    }

    async fn record(&self, kind: ConnectionEventKind, detail: String) {
        let event = ConnectionEvent::now(kind, self.endpoint(), detail);
        if let Err(err) = self.store.insert_connection_event(&event).await {
            log_warn!("Failed to record {} event: {err:?}", kind.as_str());
        }
    }

    async fn open_session(&self) -> Result<Arc<dyn SessionClient>, SessionError> {
        let session = self.factory.create();
        match bounded("connect", self.settings.connect_timeout, session.connect()).await {
            Ok(()) => Ok(session),
            Err(err) => {
                let _ = bounded("disconnect", self.settings.disconnect_timeout, session.disconnect()).await;
                Err(err)
            }
        }
    }

    async fn teardown_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) =
                bounded("disconnect", self.settings.disconnect_timeout, session.disconnect()).await
            {
                log_debug!("Ignoring disconnect failure on stale session: {err}");
            }
        }
    }

    fn log_fault(&mut self, key: &str, message: String) {
        if let Some(suppressed) = self.throttle.check(key) {
            log_warn!("{message}{}", suppressed_suffix(suppressed));
        }
    }

    async fn connected(&mut self, session: Arc<dyn SessionClient>, attempts: u32) {
        self.attempt = 0;
        self.session = Some(session);
        self.throttle.clear_all();

        let downtime = self.last_disconnect.take().map(|at| at.elapsed());
        let notice = ConnectNotice { attempts, downtime };

        match downtime {
            Some(downtime) => {
                log_info!(
                    "Reconnected to {} after {attempts} attempts (downtime: {}s)",
                    self.endpoint(),
                    downtime.as_secs()
                );
                self.record(
                    ConnectionEventKind::Reconnected,
                    format!(
                        "Reconnected after {attempts} attempts, downtime: {}s",
                        downtime.as_secs()
                    ),
                )
                .await;
            }
            None => {
                log_info!("Connected to {} after {attempts} attempt(s)", self.endpoint());
                self.record(
                    ConnectionEventKind::Connected,
                    format!("Connection established after {attempts} attempt(s)"),
                )
                .await;
            }
        }

        if let Err(err) = self.observer.on_connected(&notice).await {
            log_error!("Connect observer failed: {err:?}");
        }

        self.publish(ConnectionState::Connected);
    }

    async fn disconnected(&mut self, reason: String) {
        self.last_disconnect = Some(Instant::now());
        self.publish(ConnectionState::Disconnected);
        log_warn!("Connection to {} lost: {reason}", self.endpoint());

        self.record(
            ConnectionEventKind::Disconnected,
            format!("Connection lost: {reason}"),
        )
        .await;

        if let Err(err) = self.observer.on_disconnected(&reason).await {
            log_error!("Disconnect observer failed: {err:?}");
        }
    }

    /// Sleeps out the backoff for the next attempt. `false` when cancelled.
    async fn back_off(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.settings.backoff.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.publish(ConnectionState::Disconnected);
        log_info!(
            "Reconnect attempt {} to {} in {}ms",
            self.attempt,
            self.endpoint(),
            delay.as_millis()
        );

        tokio::select! {
            _ = sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }

    /// Initial connect. Retries transport faults with backoff until a session
    /// is up; a rejected handshake is fatal.
    async fn establish(&mut self, cancel: &CancellationToken) -> Result<(), StartupError> {
        loop {
            self.publish(ConnectionState::Connecting);
            let outcome = tokio::select! {
                outcome = self.open_session() => outcome,
                _ = cancel.cancelled() => return Err(StartupError::Aborted),
            };

            match outcome {
                Ok(session) => {
                    let attempts = self.attempt + 1;
                    self.connected(session, attempts).await;
                    return Ok(());
                }
                Err(err) if err.is_security() => {
                    log_error!("Security handshake with {} failed: {err}", self.endpoint());
                    self.publish(ConnectionState::Disconnected);
                    return Err(StartupError::Security(err.to_string()));
                }
                Err(err) => {
                    let message = format!("Initial connection to {} failed: {err}", self.endpoint());
                    self.log_fault("connect", message);
                }
            }

            if !self.back_off(cancel).await {
                return Err(StartupError::Aborted);
            }
        }
    }

    async fn monitor(&mut self, cancel: &CancellationToken) -> HealthOutcome {
        let period = self.settings.health_check_interval;
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return HealthOutcome::Cancelled,
                _ = ticker.tick() => {}
                _ = self.nudge.notified() => {
                    log_debug!("Transport fault reported; probing {} now", self.endpoint());
                }
            }

            let Some(session) = self.session.clone() else {
                return HealthOutcome::Lost("no session".to_string());
            };
            if let Err(err) = bounded("probe", self.settings.probe_timeout, session.probe()).await {
                return HealthOutcome::Lost(err.to_string());
            }
        }
    }

    /// Runs until a session is back. `false` when cancelled first.
    async fn reconnect(&mut self, cancel: &CancellationToken) -> bool {
        self.record(
            ConnectionEventKind::Reconnecting,
            "Connection lost - initiating reconnect".to_string(),
        )
        .await;

        loop {
            if !self.back_off(cancel).await {
                return false;
            }

            self.teardown_session().await;
            self.publish(ConnectionState::Connecting);

            let outcome = tokio::select! {
                outcome = self.open_session() => outcome,
                _ = cancel.cancelled() => return false,
            };
            match outcome {
                Ok(session) => {
                    let attempts = self.attempt;
                    self.connected(session, attempts).await;
                    return true;
                }
                Err(err) => {
                    let message = format!(
                        "Reconnect attempt {} to {} failed: {err}",
                        self.attempt,
                        self.endpoint()
                    );
                    self.log_fault("reconnect", message);
                    self.publish(ConnectionState::Disconnected);
                }
            }
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        loop {
            match self.monitor(&cancel).await {
                HealthOutcome::Cancelled => break,
                HealthOutcome::Lost(reason) => self.disconnected(reason).await,
            }
            if !self.reconnect(&cancel).await {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.teardown_session().await;
        self.publish(ConnectionState::Disconnected);
        log_info!("Connection supervisor for {} stopped", self.endpoint());
    }
}

/// Establishes, health-checks and restores the controller session.
pub struct ConnectionManager {
    source: HandleSource,
    supervisor: Option<Supervisor>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// `shutdown` aborts a pending `start()` and stops the supervisor when
    /// cancelled.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        settings: ConnectionSettings,
        store: Database,
        shutdown: &CancellationToken,
    ) -> Self {
        let (link_tx, link_rx) = watch::channel(Link::disconnected());
        let nudge = Arc::new(Notify::new());
        let source = HandleSource {
            link: link_rx,
            nudge: Arc::clone(&nudge),
            read_timeout: settings.read_timeout,
        };

        let supervisor = Supervisor {
            factory,
            settings,
            store,
            observer: Arc::new(NoopObserver),
            link: link_tx,
            nudge,
            session: None,
            attempt: 0,
            last_disconnect: None,
            throttle: FaultThrottle::default(),
        };

        Self {
            source,
            supervisor: Some(supervisor),
            cancel: shutdown.child_token(),
            task: None,
        }
    }

    /// Must be called before `start()`.
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.observer = observer;
        }
        self
    }

    pub fn handles(&self) -> HandleSource {
        self.source.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.source.state()
    }

    pub fn acquire_handle(&self) -> Option<SessionHandle> {
        self.source.acquire_handle()
    }

    /// Returns once a session is live. Only a rejected handshake or a
    /// shutdown request ends the attempt loop early.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        if self.task.is_some() {
            return Ok(());
        }
        let Some(mut supervisor) = self.supervisor.take() else {
            return Err(StartupError::Aborted);
        };

        log_info!("Connecting to {}", supervisor.endpoint());
        if let Err(err) = supervisor.establish(&self.cancel).await {
            supervisor.shutdown().await;
            return Err(err);
        }

        self.task = Some(tokio::spawn(supervisor.run(self.cancel.clone())));
        Ok(())
    }

    /// Cancels the health check, waits for it to finish, then disconnects.
    /// Safe to call more than once.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.supervisor = None;

        if let Some(task) = self.task.take() {
            task.await.context("connection supervisor task failed to join")?;
        }
        Ok(())
    }
}
