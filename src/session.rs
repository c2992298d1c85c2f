//! Session façade: connection supervision, action submission, subscriptions

use crate::{
    action::{Action, ActionResponse},
    bus::{AmiEventStream, EventBus, StatusBus, StatusStream, Subscribers},
    config::AmiSettings,
    correlator::Correlator,
    error::{AmiError, AmiResult},
    keepalive::keepalive_loop,
    logging::Logger,
    login::{login, LoginOutcome},
    protocol::AmiParser,
    transport::{
        read_greeting, reader_loop, stopped, tcp_connect_with_timeout, writer_loop, Generation,
        LinkState, Outgoing, OutgoingQueue,
    },
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection status transitions reported to status subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Logged in; actions can be sent
    Connected,
    /// The server rejected the credentials. No reconnection follows.
    AuthenticationFailed,
    /// Dial or greeting failed
    NetworkErrorOnConnect,
    /// An established connection went away
    NetworkErrorOnDisconnect,
}

impl ConnectionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "OK",
            ConnectionStatus::AuthenticationFailed => "AuthenticationFailed",
            ConnectionStatus::NetworkErrorOnConnect => "NetworkErrorOnConnect",
            ConnectionStatus::NetworkErrorOnDisconnect => "NetworkErrorOnDisconnect",
        };
        f.write_str(s)
    }
}

/// State shared by the façade and every background task of the session.
pub(crate) struct Shared {
    settings: AmiSettings,
    logger: Logger,
    correlator: Correlator,
    events: EventBus,
    statuses: StatusBus,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    queue: OutgoingQueue,
    current: watch::Sender<Option<Arc<Generation>>>,
    last_status: watch::Sender<Option<ConnectionStatus>>,
    generations: AtomicU64,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn settings(&self) -> &AmiSettings {
        &self.settings
    }

    fn current(&self) -> Option<Arc<Generation>> {
        self.current
            .borrow()
            .clone()
    }

    fn connected_generation(&self) -> Option<Arc<Generation>> {
        self.current()
            .filter(|generation| {
                generation.is_online() && generation.is_authenticated() && !generation.is_stopped()
            })
    }

    fn emit(&self, status: ConnectionStatus) {
        info!("[CONNECT] Status {}", status);
        self.last_status
            .send_replace(Some(status));
        self.statuses
            .publish(&status);
    }

    /// Submit `action` on `generation` and wait for its response.
    ///
    /// The pending entry is registered before the action is queued, so a
    /// reply can never arrive ahead of its waiter.
    pub(crate) async fn send_on(
        &self,
        generation: &Arc<Generation>,
        action: Action,
        action_timeout: Duration,
    ) -> AmiResult<ActionResponse> {
        let token = Uuid::new_v4().to_string();
        let wire = action.to_wire_format(&token)?;

        if action.is_logoff() {
            generation.mark_no_reconnect();
        }

        let handle = self
            .correlator
            .register(token.clone(), action.name());
        let stop = generation.stop_signal();

        debug!("[SEND] {:?} as {}", action, token);
        self.outgoing
            .send(Outgoing {
                generation: generation.id(),
                token,
                wire,
            })
            .map_err(|_| AmiError::ConnectionClosed)?;

        handle
            .wait(action_timeout, stop)
            .await
    }
}

/// Async AMI client.
///
/// Cheap to clone; all clones drive the same session. Dropping the last
/// clone stops the session's background tasks.
///
/// ```no_run
/// use asterisk_ami_tokio::{Action, AmiClient, AmiSettings, ConnectionStatus};
///
/// # async fn run() -> Result<(), asterisk_ami_tokio::AmiError> {
/// let client = AmiClient::new(AmiSettings::new("127.0.0.1", 5038, "admin", "amp111"));
/// let mut status = client.subscribe_status();
/// client.connect().await?;
///
/// while let Some(Ok(s)) = status.recv().await {
///     if s == ConnectionStatus::Connected {
///         break;
///     }
/// }
///
/// let peers = client.send(Action::new("SIPpeers")).await?;
/// for event in peers.events() {
///     println!("{}", event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AmiClient {
    shared: Arc<Shared>,
    _guard: Arc<SessionGuard>,
}

/// Stops the session once the last client clone is gone.
struct SessionGuard {
    shared: Arc<Shared>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let was_running = !self
            .shared
            .shutdown
            .send_replace(true);
        if was_running {
            self.shared
                .logger
                .in_scope(|| debug!("[CONNECT] Last client handle dropped, stopping session"));
        }
    }
}

impl AmiClient {
    /// Create a client that logs through `settings.log_level`, or through the
    /// caller's default dispatcher when no level is set.
    pub fn new(settings: AmiSettings) -> Self {
        Self::build(settings, None)
    }

    /// Create a client whose background tasks log through `dispatch`.
    pub fn with_dispatch(settings: AmiSettings, dispatch: tracing::Dispatch) -> Self {
        Self::build(settings, Some(dispatch))
    }

    fn build(settings: AmiSettings, dispatch: Option<tracing::Dispatch>) -> Self {
        let logger = Logger::new(&settings, dispatch);
        let (outgoing, queue_rx) = mpsc::unbounded_channel();
        let (current, _) = watch::channel(None);
        let (last_status, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        let queue_size = settings.event_queue_size;

        let shared = Arc::new(Shared {
            settings,
            logger,
            correlator: Correlator::new(),
            events: Arc::new(Subscribers::new(queue_size)),
            statuses: Arc::new(Subscribers::new(queue_size)),
            outgoing,
            queue: Arc::new(Mutex::new(queue_rx)),
            current,
            last_status,
            generations: AtomicU64::new(0),
            shutdown,
            supervisor: Mutex::new(None),
        });
        Self {
            _guard: Arc::new(SessionGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Start connecting in the background. Returns at once; watch
    /// [`subscribe_status`](Self::subscribe_status) for the outcome.
    ///
    /// A no-op while the session is already running.
    pub async fn connect(&self) -> AmiResult<()> {
        self.shared
            .settings
            .validate()?;

        let mut supervisor = self
            .shared
            .supervisor
            .lock()
            .await;
        if supervisor
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return Ok(());
        }

        self.shared
            .shutdown
            .send_replace(false);
        let shutdown = self
            .shared
            .shutdown
            .subscribe();
        *supervisor = Some(
            self.shared
                .logger
                .spawn(supervise(Arc::clone(&self.shared), shutdown)),
        );
        Ok(())
    }

    /// Send an action and wait for its response and correlated events.
    ///
    /// Fails with [`AmiError::NotConnected`] without touching the network
    /// unless a logged-in connection is up.
    pub async fn send(&self, action: Action) -> AmiResult<ActionResponse> {
        let shared = &self.shared;
        shared
            .logger
            .scope(async {
                let Some(generation) = shared.connected_generation() else {
                    warn!("[SEND] {} rejected, not connected", action.name());
                    return Err(AmiError::NotConnected);
                };
                shared
                    .send_on(
                        &generation,
                        action,
                        shared
                            .settings
                            .action_timeout(),
                    )
                    .await
            })
            .await
    }

    /// [`send`](Self::send) for a flat field map; the `Action` key names the
    /// action.
    pub async fn send_map(&self, action: HashMap<String, String>) -> AmiResult<ActionResponse> {
        self.send(Action::try_from(action)?)
            .await
    }

    /// Log off. The server closes the connection and the session does not
    /// reconnect.
    pub async fn logoff(&self) -> AmiResult<ActionResponse> {
        self.send(Action::logoff())
            .await
    }

    /// Stop reconnecting and close the current connection.
    ///
    /// Waits for the background tasks to finish. [`connect`](Self::connect)
    /// may be called again afterwards.
    pub async fn disconnect(&self) {
        self.shared
            .shutdown
            .send_replace(true);
        let task = self
            .shared
            .supervisor
            .lock()
            .await
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Subscribe to unsolicited events (frames without an `ActionID`).
    pub fn subscribe_events(&self) -> AmiEventStream {
        AmiEventStream::new(
            self.shared
                .events
                .subscribe(),
        )
    }

    /// Subscribe to [`ConnectionStatus`] transitions.
    pub fn subscribe_status(&self) -> StatusStream {
        StatusStream::new(
            self.shared
                .statuses
                .subscribe(),
        )
    }

    /// Connected and logged in.
    pub fn is_connected(&self) -> bool {
        self.shared
            .connected_generation()
            .is_some()
    }

    /// Last reported status, `None` before the first connection attempt ends.
    pub fn status(&self) -> Option<ConnectionStatus> {
        *self
            .shared
            .last_status
            .borrow()
    }

    /// Lifecycle state of the current connection.
    pub fn link_state(&self) -> Option<LinkState> {
        self.shared
            .current()
            .map(|generation| generation.state())
    }

    /// Banner sent by the server on the current connection.
    pub fn greeting(&self) -> Option<String> {
        self.shared
            .current()
            .and_then(|generation| {
                generation
                    .greeting()
                    .map(str::to_string)
            })
    }

    /// Events dropped because a subscriber was not keeping up.
    pub fn dropped_event_count(&self) -> u64 {
        self.shared
            .events
            .dropped_count()
    }

    /// Actions currently waiting for a response.
    pub fn pending_actions(&self) -> usize {
        self.shared
            .correlator
            .pending_count()
    }

    pub fn settings(&self) -> &AmiSettings {
        &self.shared.settings
    }
}

impl fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmiClient")
            .field("address", &self.shared.settings.address())
            .field("connected", &self.is_connected())
            .field("status", &self.status())
            .finish()
    }
}

/// Reconnection loop: one generation at a time until shutdown, a logoff, or
/// rejected credentials.
async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let id = shared
            .generations
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        let generation = Arc::new(Generation::new(id));
        shared
            .current
            .send_replace(Some(Arc::clone(&generation)));

        run_generation(&shared, &generation, &shutdown).await;

        if *shutdown.borrow() {
            debug!("[CONNECT] Shutdown requested, supervisor exiting");
            return;
        }
        if generation.no_reconnect() {
            info!("[CONNECT] Generation {} ended without reconnect", id);
            return;
        }

        let backoff = shared
            .settings
            .reconnect_interval();
        debug!("[CONNECT] Reconnecting in {:?}", backoff);
        tokio::select! {
            _ = stopped(&mut shutdown) => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

async fn run_generation(
    shared: &Arc<Shared>,
    generation: &Arc<Generation>,
    shutdown: &watch::Receiver<bool>,
) {
    let settings = &shared.settings;
    let address = settings.address();
    info!("[CONNECT] Generation {} connecting to {}", generation.id(), address);

    let mut dial_shutdown = shutdown.clone();
    let dialed = tokio::select! {
        _ = stopped(&mut dial_shutdown) => {
            generation.set_state(LinkState::Closed);
            return;
        }
        result = async {
            let mut stream = tcp_connect_with_timeout(&address, settings.dial_timeout()).await?;
            generation.set_state(LinkState::Handshaking);
            let mut parser = AmiParser::new();
            let greeting = timeout(
                settings.dial_timeout(),
                read_greeting(&mut stream, &mut parser),
            )
            .await
            .map_err(|_| AmiError::Timeout {
                timeout_ms: settings.dial_timeout_ms,
            })??;
            Ok::<_, AmiError>((stream, parser, greeting))
        } => result,
    };

    let (stream, parser, greeting) = match dialed {
        Ok(dialed) => dialed,
        Err(e) => {
            warn!("[CONNECT] Connection to {} failed: {}", address, e);
            generation.set_state(LinkState::Closed);
            shared.emit(ConnectionStatus::NetworkErrorOnConnect);
            return;
        }
    };
    generation.set_greeting(greeting);

    let (read_half, write_half) = stream.into_split();
    generation.set_state(LinkState::Online);

    let mut tasks = vec![
        shared
            .logger
            .spawn(reader_loop(
                read_half,
                parser,
                Arc::clone(generation),
                shared
                    .correlator
                    .clone(),
                Arc::clone(&shared.events),
            )),
        shared
            .logger
            .spawn(writer_loop(
                write_half,
                Arc::clone(generation),
                Arc::clone(&shared.queue),
            )),
    ];

    let watcher_generation = Arc::clone(generation);
    let mut watcher_shutdown = shutdown.clone();
    tasks.push(
        shared
            .logger
            .spawn(async move {
                let mut stop = watcher_generation.stop_signal();
                tokio::select! {
                    _ = stopped(&mut watcher_shutdown) => {
                        watcher_generation.mark_no_reconnect();
                        watcher_generation.teardown("disconnect requested");
                    }
                    _ = stopped(&mut stop) => {}
                }
            }),
    );

    let outcome = login(shared, generation).await;
    let notify_disconnect = match outcome {
        LoginOutcome::Accepted => {
            generation.mark_authenticated();
            shared.emit(ConnectionStatus::Connected);
            if settings.keepalive {
                tasks.push(
                    shared
                        .logger
                        .spawn(keepalive_loop(Arc::clone(shared), Arc::clone(generation))),
                );
            }
            true
        }
        LoginOutcome::Rejected(e) => {
            generation.mark_no_reconnect();
            shared.emit(ConnectionStatus::AuthenticationFailed);
            generation.teardown(&e.to_string());
            false
        }
        LoginOutcome::Failed(e) => {
            generation.teardown(&format!("login failed: {}", e));
            !generation.no_reconnect()
        }
    };

    stopped(&mut generation.stop_signal()).await;
    for task in tasks {
        let _ = task.await;
    }
    generation.set_state(LinkState::Closed);
    info!("[CONNECT] Generation {} closed", generation.id());

    if notify_disconnect {
        shared.emit(ConnectionStatus::NetworkErrorOnDisconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AmiSettings {
        AmiSettings::new("127.0.0.1", 5038, "admin", "secret")
    }

    #[test]
    fn status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "OK");
        assert_eq!(
            ConnectionStatus::AuthenticationFailed.to_string(),
            "AuthenticationFailed"
        );
        assert!(ConnectionStatus::Connected.is_ok());
        assert!(!ConnectionStatus::NetworkErrorOnDisconnect.is_ok());
    }

    #[tokio::test]
    async fn send_without_connection_is_rejected() {
        let client = AmiClient::new(settings());
        assert!(!client.is_connected());
        assert_eq!(client.status(), None);
        assert_eq!(client.link_state(), None);
        assert!(matches!(
            client
                .send(Action::ping())
                .await,
            Err(AmiError::NotConnected)
        ));
        assert_eq!(client.pending_actions(), 0);
    }

    #[tokio::test]
    async fn send_map_requires_action_key() {
        let client = AmiClient::new(settings());
        let result = client
            .send_map(HashMap::from([("Channel".to_string(), "x".to_string())]))
            .await;
        assert!(matches!(result, Err(AmiError::ProtocolError { .. })));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_settings() {
        let client = AmiClient::new(AmiSettings::new("", 5038, "u", "p"));
        assert!(client
            .connect()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unreachable_server_reports_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        drop(listener);

        let client = AmiClient::new(
            AmiSettings::new("127.0.0.1", port, "u", "p")
                .with_reconnect_interval(Duration::from_secs(30))
                .with_dial_timeout(Duration::from_secs(2)),
        );
        let mut status = client.subscribe_status();
        client
            .connect()
            .await
            .unwrap();

        let first = timeout(Duration::from_secs(5), status.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first, ConnectionStatus::NetworkErrorOnConnect);
        assert!(!client.is_connected());

        timeout(Duration::from_secs(5), client.disconnect())
            .await
            .unwrap();
        assert_eq!(client.link_state(), Some(LinkState::Closed));
    }
}
