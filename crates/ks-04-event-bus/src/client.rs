//! # Event Bus Client
//!
//! Keeps one outbound connection to an event bus server.
//!
//! ```text
//!   every reconnect_interval:
//!     state == Closed ──► handshake ──► Open ──► push UpdateList
//!                                         │
//!              emit() ──► outbound queue ─┤
//!                                         │
//!   inbound Emit ──► handlers[action] ◄───┘
//! ```
//!
//! `emit` while not `Open` is dropped, never buffered. The full set of
//! locally handled actions is pushed on every (re)connect and whenever
//! `on`/`off` change it.

use crate::envelope::{normalize_action, Envelope};
use futures::{SinkExt, StreamExt};
use ks_03_connections::{ConnectionState, TransportError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Default pause between connection checks.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default outbound queue depth.
pub const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct EventBusClientConfig {
    /// `ws://` or `wss://` endpoint of the event bus.
    pub url: String,
    pub reconnect_interval: Duration,
    pub outbound_buffer: usize,
}

impl EventBusClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            outbound_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }

    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    #[must_use]
    pub fn with_outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer.max(1);
        self
    }
}

type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct Shared {
    state: watch::Sender<ConnectionState>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn update_list(&self) -> Message {
        let mut actions: Vec<String> = self.handlers.read().keys().cloned().collect();
        actions.sort();
        Message::Text(Envelope::update_list(actions).encode().into())
    }

    fn enqueue(&self, message: Message) -> bool {
        let Some(outbound) = self.outbound.lock().clone() else {
            return false;
        };
        match outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "outbound queue rejected message");
                false
            }
        }
    }

    fn push_subscriptions(&self) {
        if self.state() == ConnectionState::Open {
            self.enqueue(self.update_list());
        }
    }

    fn dispatch(&self, text: &str) {
        match Envelope::decode(text) {
            Ok(Envelope::Emit(emit)) => {
                let action = normalize_action(&emit.action_name);
                let handlers: Vec<EventHandler> = self
                    .handlers
                    .read()
                    .get(&action)
                    .cloned()
                    .unwrap_or_default();
                debug!(action = %action, handlers = handlers.len(), "dispatching event");
                for handler in handlers {
                    handler(emit.data.clone());
                }
            }
            Ok(Envelope::UpdateList(_)) => {
                debug!("ignoring subscription list sent by server");
            }
            Err(e) => debug!(error = %e, "dropping inbound message"),
        }
    }
}

/// Auto-reconnecting event bus client.
///
/// Dropping the client stops its background task.
pub struct EventBusClient {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBusClient {
    /// Start the background connection task. Must be called inside a Tokio
    /// runtime.
    pub fn spawn(config: EventBusClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let shared = Arc::new(Shared {
            state,
            handlers: RwLock::new(HashMap::new()),
            outbound: Mutex::new(None),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(Arc::clone(&shared), config, shutdown_rx));

        Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Wait until the client reaches `state`. Returns `false` if the
    /// background task is gone.
    pub async fn wait_for_state(&self, state: ConnectionState) -> bool {
        let mut rx = self.shared.state.subscribe();
        let reached = rx.wait_for(|current| *current == state).await.is_ok();
        reached
    }

    /// Send an event to every subscriber of `action`. Dropped (returns
    /// `false`) unless the connection is open.
    pub fn emit(&self, action: &str, data: Value) -> bool {
        if self.shared.state() != ConnectionState::Open {
            debug!(action = %action, "not connected, dropping emit");
            return false;
        }
        let text = Envelope::emit(action, data).encode();
        self.shared.enqueue(Message::Text(text.into()))
    }

    /// Handle inbound events for `action`. Several handlers may share an
    /// action; they run in registration order on the connection task.
    pub fn on<F>(&self, action: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let added = {
            let mut handlers = self.shared.handlers.write();
            let entry = handlers.entry(normalize_action(action)).or_default();
            entry.push(Arc::new(handler));
            entry.len() == 1
        };
        if added {
            self.shared.push_subscriptions();
        }
    }

    /// Remove every handler for `action`. Returns `false` if there were none.
    pub fn off(&self, action: &str) -> bool {
        let removed = self
            .shared
            .handlers
            .write()
            .remove(&normalize_action(action))
            .is_some();
        if removed {
            self.shared.push_subscriptions();
        }
        removed
    }

    /// Sorted action names with at least one local handler.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.shared.handlers.read().keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Close the connection and stop reconnecting.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "event bus client task failed");
            }
        }
    }
}

impl Drop for EventBusClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Periodic check: whenever the connection is closed, dial again.
async fn run(shared: Arc<Shared>, config: EventBusClientConfig, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(config.reconnect_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if shared.state() != ConnectionState::Closed {
            continue;
        }

        shared.set_state(ConnectionState::Connecting);
        debug!(url = %config.url, "connecting to event bus");

        let connected = tokio::select! {
            result = dial(&config.url) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(stream) => {
                info!(url = %config.url, "event bus connected");
                run_session(&shared, stream, config.outbound_buffer, &mut shutdown).await;
                info!(url = %config.url, "event bus disconnected");
            }
            Err(e) => warn!(url = %config.url, error = %e, "event bus connect failed"),
        }
        shared.set_state(ConnectionState::Closed);
    }

    *shared.outbound.lock() = None;
    shared.set_state(ConnectionState::Closed);
    debug!("event bus client stopped");
}

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket handshake against `url`.
async fn dial(url: &str) -> Result<ClientStream, TransportError> {
    let (stream, _) = connect_async(url).await.map_err(TransportError::connect)?;
    Ok(stream)
}

/// Run one connection until either side closes it.
async fn run_session(
    shared: &Shared,
    stream: ClientStream,
    outbound_buffer: usize,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::channel(outbound_buffer);
    *shared.outbound.lock() = Some(tx);
    shared.set_state(ConnectionState::Open);

    // After Open, so a concurrent `on` either lands in this list or pushes
    // its own update through the queue.
    if let Err(e) = write.send(shared.update_list()).await {
        warn!(error = %e, "failed to push subscriptions");
    } else {
        loop {
            tokio::select! {
                Some(message) = rx.recv() => {
                    if let Err(e) = write.send(message).await {
                        warn!(error = %e, "event bus write failed");
                        break;
                    }
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "event bus read failed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    shared.set_state(ConnectionState::Closing);
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not sent");
                    }
                    break;
                }
            }
        }
    }

    *shared.outbound.lock() = None;
    shared.set_state(ConnectionState::Closed);
}
