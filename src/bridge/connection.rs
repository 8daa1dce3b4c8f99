//! Connection manager
//!
//! One task owns the transport link, the connection state machine, the
//! single reconnect deadline and the state observers. Callers talk to it
//! through a cloneable [`ConnectionHandle`]; every state change is applied
//! and announced from the task itself, so observers see transitions in order
//! and exactly once.
//!
//! ```text
//! Disconnected --connect--> Connecting --link up--> Connected
//! Connected --clean close--> Disconnected
//! Connecting/Connected --error or unclean close--> Failed --timer--> Connecting
//! any --set_enabled(false)--> Disabled --set_enabled(true)--> Disconnected
//! ```

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec::{self, Envelope, MessageKind};
use super::error::{
    BridgeError, ConnectionError, ConnectionResult, RequestFailure, TransportError,
};
use super::tracker::{RequestTracker, ResponseHandle};
use super::transport::{Connector, Frame, TransportEvent, TransportLink};
use super::{BridgeConfig, Endpoint, EndpointResolver, ReconnectPolicy};

/// Notification sent before a graceful disconnect
pub const SESSION_END_METHOD: &str = "session/end";

/// How often pending requests are checked for expiry
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link and nothing scheduled beyond a possible explicit connect
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Link established
    Connected,
    /// Link lost or attempt failed; a retry may be scheduled
    Failed,
    /// Bridge switched off; connect is refused
    Disabled,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Disabled => "disabled",
        };
        f.write_str(label)
    }
}

/// Snapshot published after every change the manager makes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Reconnection attempts made since the last successful connect
    pub attempts: u32,
    /// Whether a reconnect timer is armed
    pub reconnect_scheduled: bool,
}

/// A state transition delivered to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition
    pub previous: ConnectionState,
    /// State after the transition
    pub current: ConnectionState,
    /// Transport error that caused the transition, if any
    pub error: Option<String>,
}

/// Callback invoked on the manager task for every state change
pub type StateObserver = Box<dyn Fn(&StateChange) + Send + 'static>;

type ConnectFuture = BoxFuture<'static, Result<TransportLink, TransportError>>;

enum Command {
    Connect {
        reply: oneshot::Sender<ConnectionResult<()>>,
    },
    Disconnect {
        graceful: bool,
        reply: oneshot::Sender<()>,
    },
    Send {
        envelope: Envelope,
        reply: oneshot::Sender<ConnectionResult<()>>,
    },
    Request {
        method: String,
        params: Value,
        reply: oneshot::Sender<Result<ResponseHandle, BridgeError>>,
    },
    SetAutoReconnect(bool),
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Subscribe(StateObserver),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the connection manager task
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    tracker: Arc<RequestTracker>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("status", &*self.status.borrow())
            .field("pending", &self.tracker.len())
            .finish()
    }
}

impl ConnectionHandle {
    fn submit(&self, command: Command) -> ConnectionResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ConnectionError::ManagerStopped)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> ConnectionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.submit(build(tx))?;
        rx.await.map_err(|_| ConnectionError::ManagerStopped)
    }

    /// Start connecting.
    ///
    /// A no-op while already connecting or connected. Resets the retry
    /// counter, so this is also how a caller resumes after retries ran out.
    pub async fn connect(&self) -> ConnectionResult<()> {
        self.call(|reply| Command::Connect { reply }).await?
    }

    /// Tear the link down, cancel any pending retry and fail every pending
    /// request with a closed-connection outcome.
    ///
    /// A graceful disconnect first sends a `session/end` notification.
    pub async fn disconnect(&self, graceful: bool) -> ConnectionResult<()> {
        self.call(|reply| Command::Disconnect { graceful, reply }).await
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }

    /// Current connection state
    pub fn current_state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Full status snapshot
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every published status snapshot
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the manager reports `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionResult<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.state == target)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::ManagerStopped)
    }

    /// Send an envelope as-is.
    pub async fn send(&self, envelope: Envelope) -> ConnectionResult<()> {
        self.call(|reply| Command::Send { envelope, reply }).await?
    }

    /// Send a notification.
    pub async fn send_notification(&self, method: &str, params: Value) -> ConnectionResult<()> {
        self.send(Envelope::notification(method, params)).await
    }

    /// Send a request and return a handle for its eventual response.
    ///
    /// Returns once the frame is queued; the response is correlated later.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<ResponseHandle, BridgeError> {
        let method = method.to_string();
        self.call(|reply| Command::Request {
            method,
            params,
            reply,
        })
        .await?
    }

    /// Turn automatic reconnection on or off. Turning it off cancels a
    /// pending retry.
    pub fn set_auto_reconnect(&self, enabled: bool) -> ConnectionResult<()> {
        self.submit(Command::SetAutoReconnect(enabled))
    }

    /// Enable or disable the bridge.
    pub async fn set_enabled(&self, enabled: bool) -> ConnectionResult<()> {
        self.call(|reply| Command::SetEnabled { enabled, reply })
            .await
    }

    /// Register a state observer.
    pub fn subscribe<F>(&self, observer: F) -> ConnectionResult<()>
    where
        F: Fn(&StateChange) + Send + 'static,
    {
        self.submit(Command::Subscribe(Box::new(observer)))
    }

    /// Message of the most recent transport error
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Forget the most recent transport error.
    pub fn clear_last_error(&self) {
        self.last_error.lock().take();
    }

    /// Tracker holding outbound requests
    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    /// Disconnect gracefully and stop the manager task.
    pub async fn shutdown(&self) -> ConnectionResult<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    /// Handle that does not keep the manager task alive.
    pub fn downgrade(&self) -> WeakConnectionHandle {
        WeakConnectionHandle {
            commands: self.commands.downgrade(),
            status: self.status.clone(),
            tracker: self.tracker.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Non-owning counterpart of [`ConnectionHandle`]
///
/// The manager task stops once every [`ConnectionHandle`] is dropped, even
/// while weak handles remain.
#[derive(Clone)]
pub struct WeakConnectionHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    tracker: Arc<RequestTracker>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl WeakConnectionHandle {
    /// A full handle, unless the manager has already lost its last one.
    pub fn upgrade(&self) -> Option<ConnectionHandle> {
        Some(ConnectionHandle {
            commands: self.commands.upgrade()?,
            status: self.status.clone(),
            tracker: self.tracker.clone(),
            last_error: self.last_error.clone(),
        })
    }
}

/// The task-side state of a connection
pub struct ConnectionManager {
    resolver: Arc<dyn EndpointResolver>,
    connector: Arc<dyn Connector>,
    tracker: Arc<RequestTracker>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    state: ConnectionState,
    status_tx: watch::Sender<ConnectionStatus>,
    observers: Vec<StateObserver>,
    attempts: u32,
    reconnect_at: Option<Instant>,
    pending_connect: Option<ConnectFuture>,
    link: Option<TransportLink>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    last_error: Arc<Mutex<Option<String>>>,
    request_counter: u64,
}

impl ConnectionManager {
    /// Spawn a manager dialing the endpoint described by `config`.
    ///
    /// Returns the handle and the stream of parsed inbound envelopes.
    pub fn spawn(
        config: &BridgeConfig,
        connector: Arc<dyn Connector>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<Envelope>) {
        Self::spawn_with_resolver(config, Arc::new(config.clone()), connector)
    }

    /// Spawn a manager with a separate endpoint resolver.
    pub fn spawn_with_resolver(
        config: &BridgeConfig,
        resolver: Arc<dyn EndpointResolver>,
        connector: Arc<dyn Connector>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<Envelope>) {
        let state = if config.enabled {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Disabled
        };
        let (status_tx, status_rx) = watch::channel(ConnectionStatus {
            state,
            attempts: 0,
            reconnect_scheduled: false,
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(RequestTracker::new());
        let last_error = Arc::new(Mutex::new(None));

        let manager = ConnectionManager {
            resolver,
            connector,
            tracker: tracker.clone(),
            policy: config.reconnect.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            state,
            status_tx,
            observers: Vec::new(),
            attempts: 0,
            reconnect_at: None,
            pending_connect: None,
            link: None,
            inbound_tx,
            last_error: last_error.clone(),
            request_counter: 0,
        };
        tokio::spawn(manager.run(command_rx));

        let handle = ConnectionHandle {
            commands: command_tx,
            status: status_rx,
            tracker,
            last_error,
        };
        (handle, inbound_rx)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("Last connection handle dropped");
                        self.teardown(true);
                        break;
                    }
                },
                result = poll_connect(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result);
                }
                event = next_event(&mut self.link) => self.on_transport_event(event),
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.attempt_reconnect();
                }
                _ = sweep.tick() => self.sweep_expired(),
            }
        }

        debug!("Connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect { reply } => {
                let result = self.connect_requested();
                let _ = reply.send(result);
            }
            Command::Disconnect { graceful, reply } => {
                self.teardown(graceful);
                let _ = reply.send(());
            }
            Command::Send { envelope, reply } => {
                let result = self.send_envelope(&envelope);
                let _ = reply.send(result);
            }
            Command::Request {
                method,
                params,
                reply,
            } => {
                let result = self.send_request(&method, params);
                let _ = reply.send(result);
            }
            Command::SetAutoReconnect(enabled) => {
                self.policy.enabled = enabled;
                if !enabled {
                    self.reconnect_at = None;
                }
                info!(enabled, "Auto-reconnect updated");
                self.publish();
            }
            Command::SetEnabled { enabled, reply } => {
                if enabled {
                    if self.state == ConnectionState::Disabled {
                        self.set_state(ConnectionState::Disconnected, None);
                    }
                } else if self.state != ConnectionState::Disabled {
                    self.teardown(true);
                    self.set_state(ConnectionState::Disabled, None);
                }
                let _ = reply.send(());
            }
            Command::Subscribe(observer) => self.observers.push(observer),
            Command::Shutdown { reply } => {
                self.teardown(true);
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn connect_requested(&mut self) -> ConnectionResult<()> {
        match self.state {
            ConnectionState::Disabled => Err(ConnectionError::Disabled),
            ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected | ConnectionState::Failed => {
                // An unresolvable endpoint rejects the call and changes nothing.
                let endpoint = self.resolver.resolve().inspect_err(|err| {
                    warn!(error = %err, "Connect rejected");
                })?;
                self.attempts = 0;
                self.reconnect_at = None;
                self.begin_connect(&endpoint);
                Ok(())
            }
        }
    }

    fn begin_connect(&mut self, endpoint: &Endpoint) {
        if self.pending_connect.is_some() || self.link.is_some() {
            return;
        }

        info!(url = %endpoint.url, attempt = self.attempts, "Connecting");
        let attempt = self.connector.connect(endpoint);
        let timeout = self.connect_timeout;
        self.pending_connect = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::TimedOut(timeout.as_millis() as u64)),
            }
        }));
        self.set_state(ConnectionState::Connecting, None);
    }

    fn on_connect_result(&mut self, result: Result<TransportLink, TransportError>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.attempts = 0;
                self.set_state(ConnectionState::Connected, None);
            }
            Err(err) => {
                warn!(error = %err, attempt = self.attempts, "Connection attempt failed");
                self.on_transport_failure(err.to_string());
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.on_frame(&text),
            TransportEvent::Closed {
                code,
                reason,
                clean: true,
            } => {
                info!(?code, reason = %reason, "Connection closed by remote");
                self.link = None;
                self.evict_pending();
                self.set_state(ConnectionState::Disconnected, None);
            }
            TransportEvent::Closed {
                code,
                reason,
                clean: false,
            } => {
                warn!(?code, reason = %reason, "Connection dropped");
                self.on_transport_failure(format!("connection dropped: {reason}"));
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, "Transport error");
                self.on_transport_failure(message);
            }
        }
    }

    fn on_transport_failure(&mut self, message: String) {
        self.pending_connect = None;
        self.link = None;
        self.evict_pending();
        *self.last_error.lock() = Some(message.clone());
        self.set_state(ConnectionState::Failed, Some(message));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.policy.enabled {
            return;
        }
        if self.attempts >= self.policy.max_attempts {
            error!(
                attempts = self.attempts,
                "Reconnection attempts exhausted; call connect() to retry"
            );
            return;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.reconnect_at = Some(Instant::now() + delay);
        info!(
            attempt = self.attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.publish();
    }

    fn attempt_reconnect(&mut self) {
        if self.state != ConnectionState::Failed {
            self.publish();
            return;
        }
        if self.attempts >= self.policy.max_attempts {
            error!(attempts = self.attempts, "Reconnection attempts exhausted");
            self.publish();
            return;
        }
        self.attempts += 1;
        match self.resolver.resolve() {
            Ok(endpoint) => self.begin_connect(&endpoint),
            Err(err) => {
                warn!(
                    error = %err,
                    attempt = self.attempts,
                    "Reconnect attempt could not start"
                );
                *self.last_error.lock() = Some(err.to_string());
                self.schedule_reconnect();
            }
        }
        self.publish();
    }

    fn teardown(&mut self, graceful: bool) {
        self.reconnect_at = None;
        self.pending_connect = None;
        if let Some(link) = self.link.take() {
            if graceful {
                let end = Envelope::notification(SESSION_END_METHOD, json!({}));
                let _ = link.outbound.send(Frame::Text(codec::serialize(&end)));
            }
            let _ = link.outbound.send(Frame::Close);
        }
        self.evict_pending();
        self.attempts = 0;
        if self.state != ConnectionState::Disabled {
            self.set_state(ConnectionState::Disconnected, None);
        }
        self.publish();
    }

    fn evict_pending(&self) {
        let evicted = self.tracker.evict_all();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Failing pending requests");
        }
        for request in evicted {
            request.complete(Err(RequestFailure::ConnectionClosed));
        }
    }

    fn sweep_expired(&self) {
        let Some(timeout) = self.request_timeout else {
            return;
        };
        for request in self.tracker.evict_expired(Instant::now()) {
            warn!(request_id = %request.id, method = %request.method, "Request timed out");
            request.complete(Err(RequestFailure::TimedOut(timeout.as_millis() as u64)));
        }
    }

    fn outbound(&self) -> ConnectionResult<&mpsc::UnboundedSender<Frame>> {
        match (&self.link, self.state) {
            (_, ConnectionState::Disabled) => Err(ConnectionError::Disabled),
            (Some(link), ConnectionState::Connected) => Ok(&link.outbound),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    fn send_envelope(&self, envelope: &Envelope) -> ConnectionResult<()> {
        self.outbound()?
            .send(Frame::Text(codec::serialize(envelope)))
            .map_err(|_| ConnectionError::NotConnected)
    }

    fn send_request(&mut self, method: &str, params: Value) -> Result<ResponseHandle, BridgeError> {
        self.outbound()?;
        self.request_counter += 1;
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("req_{}_{}", self.request_counter, &suffix[..8]);

        let handle = self
            .tracker
            .register_awaiting(&id, method, self.request_timeout)?;
        if let Err(err) = self.send_envelope(&Envelope::request(id.as_str(), method, params)) {
            let _ = self.tracker.resolve(&id);
            return Err(err.into());
        }
        debug!(request_id = %id, method, "Request sent");
        Ok(handle)
    }

    fn on_frame(&mut self, text: &str) {
        let envelope = match codec::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Discarding malformed message");
                return;
            }
        };

        if envelope.kind == MessageKind::Response {
            match envelope.request_id() {
                Some(id) => match self.tracker.resolve(id) {
                    Ok(pending) => {
                        debug!(request_id = %id, method = %pending.method, "Response received");
                        let outcome = match &envelope.error {
                            Some(error) => Err(RequestFailure::Remote(error.clone())),
                            None => Ok(envelope.result.clone().unwrap_or(Value::Null)),
                        };
                        pending.complete(outcome);
                    }
                    Err(_) => debug!(request_id = %id, "Unsolicited response"),
                },
                None => warn!("Response without id"),
            }
        }

        let _ = self.inbound_tx.send(envelope);
    }

    fn set_state(&mut self, next: ConnectionState, error: Option<String>) {
        if self.state == next {
            self.publish();
            return;
        }
        let change = StateChange {
            previous: self.state,
            current: next,
            error,
        };
        self.state = next;
        info!(previous = %change.previous, current = %change.current, "Connection state changed");
        self.publish();
        for observer in &self.observers {
            observer(&change);
        }
    }

    fn publish(&self) {
        let status = ConnectionStatus {
            state: self.state,
            attempts: self.attempts,
            reconnect_scheduled: self.reconnect_at.is_some(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn poll_connect(
    pending: &mut Option<ConnectFuture>,
) -> Result<TransportLink, TransportError> {
    match pending {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: "transport dropped".into(),
            clean: false,
        }),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
