//! Connection manager and per-session driver task.
//!
//! [`ConnectionManager::activate`] spawns one driver task per session. The
//! driver owns the [`StompClient`], subscribes the planned topics once the
//! broker answers CONNECTED, applies incoming frames to the session's
//! [`SessionStore`], and serves publish and page-merge requests from its
//! command queue. At most one session is live at a time: a newer
//! activation supersedes the old one, and a stale [`SessionHandle`] can no
//! longer change anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use stompchat_proto::destination::{Destination, SessionScope};
use stompchat_proto::message::MessagePage;

use crate::auth::AuthContext;
use crate::pagination::FetchOutcome;
use crate::stomp::{Delivery, StompClient};
use crate::store::{FetchTicket, SessionStore};
use crate::subscription::{self, TopicSubscription};
use crate::transport::{Connector, TransportError};

/// Default broker endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Default bound on WebSocket upgrade plus STOMP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the DISCONNECT receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default capacity of a session's command queue.
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Lifecycle of the current session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, or the last one ended.
    Disconnected,
    /// Transport opening or STOMP handshake in progress.
    Connecting,
    /// Handshake done and topics subscribed.
    Connected,
    /// Teardown requested; UNSUBSCRIBE/DISCONNECT in progress.
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` URL of the broker.
    pub endpoint: String,
    /// Bound on open plus handshake.
    pub connect_timeout: Duration,
    /// Wait for the DISCONNECT receipt.
    pub receipt_timeout: Duration,
    /// Capacity of each session's command queue.
    pub command_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Generation bookkeeping shared by the manager, its handles, and drivers.
#[derive(Debug)]
struct Shared {
    slot: parking_lot::Mutex<Slot>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Debug, Default)]
struct Slot {
    /// Last generation handed out. Only it may publish state changes.
    issued: u64,
    /// Generation whose frames may still be applied; 0 when none.
    live: u64,
}

impl Shared {
    fn is_live(&self, generation: u64) -> bool {
        self.slot.lock().live == generation
    }

    /// Publish `state` if `generation` is still the newest session.
    fn set_state(&self, generation: u64, state: ConnectionState) {
        let slot = self.slot.lock();
        if slot.issued == generation {
            self.state.send_replace(state);
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Requests served by a session driver.
enum DriverCommand {
    Publish {
        destination: Destination,
        body: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    ApplyPage {
        ticket: FetchTicket,
        page: MessagePage,
        reply: oneshot::Sender<FetchOutcome>,
    },
}

/// The caller's reference to one activated session.
///
/// Cheap to clone. Once superseded or deactivated, publishing through it is
/// rejected and its store stops changing.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    generation: u64,
    scope: SessionScope,
    auth: AuthContext,
    store: SessionStore,
    commands: mpsc::Sender<DriverCommand>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DriverCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publish { destination, .. } => {
                f.debug_struct("Publish").field("destination", destination).finish()
            }
            Self::ApplyPage { ticket, .. } => {
                f.debug_struct("ApplyPage").field("anchor", &ticket.anchor()).finish()
            }
        }
    }
}

impl SessionHandle {
    /// Activation counter value of this session.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The scope this session is bound to.
    #[must_use]
    pub const fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Who this session acts as.
    #[must_use]
    pub const fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// This session's message store.
    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Whether frames for this session are still being applied.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.is_live(self.generation)
    }

    /// Whether this session is live and its handshake has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_live() && self.shared.state() == ConnectionState::Connected
    }

    /// Publish `body` to `destination` through this session's connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the session is gone,
    /// or the transport error from the SEND.
    pub async fn publish(
        &self,
        destination: Destination,
        body: String,
    ) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::ConnectionClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DriverCommand::Publish {
                destination,
                body,
                reply,
            })
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;
        rx.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    /// Hand a fetched page to the driver for merging.
    pub(crate) async fn apply_page(&self, ticket: FetchTicket, page: MessagePage) -> FetchOutcome {
        let (reply, rx) = oneshot::channel();
        let command = DriverCommand::ApplyPage {
            ticket,
            page,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return FetchOutcome::Discarded;
        }
        rx.await.unwrap_or(FetchOutcome::Discarded)
    }
}

/// The manager's record of the session it spawned last.
struct ActiveSession {
    handle: SessionHandle,
    shutdown: oneshot::Sender<()>,
}

/// Owns the single live broker session.
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    active: parking_lot::Mutex<Option<ActiveSession>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager in [`ConnectionState::Disconnected`].
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector: Arc::new(connector),
            config,
            shared: Arc::new(Shared {
                slot: parking_lot::Mutex::new(Slot::default()),
                state,
            }),
            active: parking_lot::Mutex::new(None),
        }
    }

    /// The connection settings.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Receiver that wakes on every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Handle of the most recently activated session, if not deactivated.
    #[must_use]
    pub fn current(&self) -> Option<SessionHandle> {
        self.active.lock().as_ref().map(|a| a.handle.clone())
    }

    /// Start a session for `scope` as `auth`, tearing down any previous one.
    ///
    /// Returns immediately in [`ConnectionState::Connecting`]; the driver
    /// task performs the connect. Must be called inside a tokio runtime.
    pub fn activate(&self, scope: SessionScope, auth: AuthContext) -> SessionHandle {
        let mut active = self.active.lock();

        let generation = {
            let mut slot = self.shared.slot.lock();
            slot.issued += 1;
            slot.live = slot.issued;
            slot.issued
        };

        if let Some(previous) = active.take() {
            tracing::debug!(
                generation = previous.handle.generation,
                scope = %previous.handle.scope,
                "superseding session"
            );
            let _ = previous.shutdown.send(());
        }

        self.shared.state.send_replace(ConnectionState::Connecting);

        let (commands, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = SessionHandle {
            generation,
            scope: scope.clone(),
            auth,
            store: SessionStore::new(),
            commands,
            shared: Arc::clone(&self.shared),
        };

        tracing::info!(generation, scope = %scope, "activating session");

        let driver = Driver {
            handle: handle.clone(),
            config: self.config.clone(),
            subscriptions: HashMap::new(),
        };
        tokio::spawn(driver.run(Arc::clone(&self.connector), command_rx, shutdown_rx));

        *active = Some(ActiveSession {
            handle: handle.clone(),
            shutdown,
        });
        handle
    }

    /// Tear down `handle`'s session.
    ///
    /// Returns `false`, doing nothing, when `handle` is not the live
    /// session: it was superseded, already deactivated, or its connection
    /// already ended.
    pub fn deactivate(&self, handle: &SessionHandle) -> bool {
        let mut active = self.active.lock();
        let is_current = active
            .as_ref()
            .is_some_and(|a| a.handle.generation == handle.generation);
        if !is_current {
            tracing::debug!(generation = handle.generation, "stale deactivate ignored");
            return false;
        }

        let was_live = {
            let mut slot = self.shared.slot.lock();
            let was_live = slot.live == handle.generation;
            if was_live {
                slot.live = 0;
            }
            was_live
        };

        if let Some(session) = active.take() {
            if was_live {
                self.shared
                    .set_state(handle.generation, ConnectionState::Disconnecting);
                tracing::info!(
                    generation = handle.generation,
                    scope = %handle.scope,
                    "deactivating session"
                );
            }
            let _ = session.shutdown.send(());
        }
        was_live
    }
}

impl<C> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        // Dropping the shutdown sender wakes the driver into teardown.
        self.active.get_mut().take();
    }
}

/// Why a driver left its main loop.
enum Exit {
    Shutdown,
    Failed(TransportError),
}

/// State owned by one session's driver task.
struct Driver {
    handle: SessionHandle,
    config: ConnectionConfig,
    subscriptions: HashMap<String, TopicSubscription>,
}

impl Driver {
    async fn run<C: Connector>(
        mut self,
        connector: Arc<C>,
        mut commands: mpsc::Receiver<DriverCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let generation = self.handle.generation;

        let connect = within(self.config.connect_timeout, self.connect(&*connector));
        let mut client = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::debug!(generation, "session cancelled while connecting");
                self.finish();
                return;
            }
            result = connect => match result {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(
                        generation,
                        error = %e,
                        timeout_ms = self.config.connect_timeout.as_millis(),
                        "session connect failed"
                    );
                    self.finish();
                    return;
                }
            },
        };

        if let Err(e) = self.subscribe_all(&mut client).await {
            tracing::warn!(generation, error = %e, "subscribing failed");
            client.disconnect(Duration::ZERO).await;
            self.finish();
            return;
        }
        self.handle
            .shared
            .set_state(generation, ConnectionState::Connected);
        tracing::info!(
            generation,
            scope = %self.handle.scope,
            topics = self.subscriptions.len(),
            "session connected"
        );

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Exit::Shutdown,
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.serve(&client, command).await {
                            break Exit::Failed(e);
                        }
                    }
                    None => break Exit::Shutdown,
                },
                delivery = client.next_delivery() => match delivery {
                    Ok(delivery) => self.deliver(&delivery),
                    Err(e) => break Exit::Failed(e),
                },
            }
        };

        match exit {
            Exit::Shutdown => {
                for id in self.subscriptions.keys() {
                    if let Err(e) = client.unsubscribe(id).await {
                        tracing::debug!(generation, error = %e, "UNSUBSCRIBE failed");
                        break;
                    }
                }
                client.disconnect(self.config.receipt_timeout).await;
                tracing::info!(generation, "session closed");
            }
            Exit::Failed(e) => {
                tracing::warn!(generation, error = %e, "session transport failed");
                client.disconnect(Duration::ZERO).await;
            }
        }
        self.finish();
    }

    /// Open the transport and run the STOMP handshake.
    async fn connect<C: Connector>(
        &self,
        connector: &C,
    ) -> Result<StompClient<C::Transport>, TransportError> {
        let endpoint = &self.config.endpoint;
        let transport = connector.open(endpoint).await?;
        StompClient::handshake(transport, &broker_host(endpoint), &self.handle.auth.stomp_headers())
            .await
    }

    /// Subscribe every planned topic, in plan order.
    async fn subscribe_all<T: crate::transport::FrameTransport>(
        &mut self,
        client: &mut StompClient<T>,
    ) -> Result<(), TransportError> {
        for planned in subscription::plan(&self.handle.scope, &self.handle.auth) {
            let id = client.subscribe(&planned.topic).await?;
            self.subscriptions.insert(id, planned);
        }
        Ok(())
    }

    /// Serve one queued command. An error means the transport is gone.
    async fn serve<T: crate::transport::FrameTransport>(
        &self,
        client: &StompClient<T>,
        command: DriverCommand,
    ) -> Result<(), TransportError> {
        match command {
            DriverCommand::Publish {
                destination,
                body,
                reply,
            } => {
                let result = client
                    .publish(&destination, body, &self.handle.auth.stomp_headers())
                    .await;
                let failure = result.as_ref().err().map(ToString::to_string);
                let _ = reply.send(result);
                if let Some(reason) = failure {
                    return Err(TransportError::Protocol(format!("publish failed: {reason}")));
                }
                Ok(())
            }
            DriverCommand::ApplyPage {
                ticket,
                page,
                reply,
            } => {
                let outcome = if self.handle.is_live() {
                    self.handle.store.apply_page(&ticket, page)
                } else {
                    FetchOutcome::Discarded
                };
                let _ = reply.send(outcome);
                Ok(())
            }
        }
    }

    /// Apply one MESSAGE frame to the store.
    fn deliver(&self, delivery: &Delivery) {
        let generation = self.handle.generation;
        if !self.handle.is_live() {
            tracing::trace!(generation, "frame after deactivate dropped");
            return;
        }
        let Some(planned) = self.subscriptions.get(&delivery.subscription) else {
            tracing::debug!(
                generation,
                subscription = %delivery.subscription,
                "frame for unknown subscription dropped"
            );
            return;
        };
        let result = self
            .handle
            .store
            .update(|window| subscription::apply(planned, &delivery.body, window));
        if let Err(e) = result {
            tracing::warn!(generation, error = %e, "dropping malformed frame");
        }
    }

    /// Release the live slot and report Disconnected if still newest.
    fn finish(&self) {
        let generation = self.handle.generation;
        {
            let mut slot = self.handle.shared.slot.lock();
            if slot.live == generation {
                slot.live = 0;
            }
        }
        self.handle
            .shared
            .set_state(generation, ConnectionState::Disconnected);
    }
}

/// Bound `attempt` by `limit`; expiry is a [`TransportError::Timeout`].
async fn within<T>(
    limit: Duration,
    attempt: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, attempt)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Value of the CONNECT `host` header for `endpoint`.
fn broker_host(endpoint: &str) -> String {
    url::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}
