// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `GatewayNode`: the task that owns the gateway connection.
//!
//! # Design
//!
//! ```text
//!   NodeHandle ──► mpsc::Sender<NodeCommand> ──► GatewayNode::run
//!   (cloned)                                        │ owns state machine,
//!                                                   │ pending map, sink
//!   reader task ──┐                                 │
//!   timers      ──┼─► mpsc::UnboundedSender<EngineEvent>
//!   keepalive   ──┤   (every message tagged with the connection generation)
//!   commands    ──┘                                 │
//!                                                   ▼
//!   NodeHandle ◄── watch::Receiver<ConnectionState>
//!              ◄── broadcast::Receiver<NodeEvent>
//! ```
//!
//! Everything that can outlive a connection (reader, handshake timer,
//! keepalive ticker, command invocations) posts back to the owner with the
//! generation it was started under. Tearing a connection down bumps the
//! generation, so anything still in flight is recognised and dropped.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tether_node::client::{GatewayNode, NodeOptions};
//! # use tether_node::dispatch::{Capabilities, CommandDispatcher, DispatchPolicy, HostState};
//! # use tether_node::identity::IdentityStore;
//! # use tether_node::transport::WsConnector;
//! # struct Host;
//! # impl HostState for Host { fn is_foreground(&self) -> bool { true } }
//! # async fn example() -> Result<(), tether_node::NodeError> {
//! let dispatcher = CommandDispatcher::new(
//!     Capabilities::new(Arc::new(Host)),
//!     DispatchPolicy::default(),
//! );
//! let (node, handle) = GatewayNode::new(
//!     NodeOptions::default(),
//!     IdentityStore::new("/var/lib/tether"),
//!     Arc::new(WsConnector),
//!     Arc::new(dispatcher),
//! )?;
//! tokio::spawn(node.run());
//!
//! handle.connect().await?;
//! handle.wait_for_state(|s| s.is_connected()).await?;
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use tether_config::Config;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::{ReconnectPolicy, MAX_ATTEMPTS_REASON};
use super::keepalive::spawn_keepalive;
use super::pending::{PendingRequests, Reply};
use super::state::{ConnectionState, StateMachine};
use crate::dispatch::{ActivityLog, ActivityRecord, CommandDispatcher, CommandError};
use crate::error::{NodeError, RequestError};
use crate::identity::{DeviceIdentity, IdentityStore};
use crate::protocol::commands::{
    NodeEventParams, NodeInvokeParams, NodeInvokeRequest, NodeInvokeResult, NODE_EVENT_METHOD,
    NODE_INVOKE_METHOD, NODE_INVOKE_REQUEST_EVENT, NODE_INVOKE_RESULT_METHOD,
};
use crate::protocol::handshake::{
    ClientInfo, ConnectChallenge, ConnectTemplate, HelloOk, CONNECT_CHALLENGE_EVENT,
    CONNECT_METHOD, DEFAULT_TICK_INTERVAL_MS, HELLO_OK,
};
use crate::protocol::{
    decode_frame, encode_frame, EventFrame, Frame, RequestFrame, ResponseFrame,
};
use crate::transport::{Connector, FrameSink, FrameSource, TransportError, TransportPair};

// ── Options ───────────────────────────────────────────────────────────────────

/// Static settings for one node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub url: String,
    pub client: ClientInfo,
    pub role: String,
    pub scopes: Vec<String>,
    pub locale: String,
    pub user_agent: String,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub activity_capacity: usize,
}

impl NodeOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let version = cfg
            .client
            .version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        Self {
            url: cfg.gateway.url.clone(),
            user_agent: format!("tether/{version} ({})", cfg.client.platform),
            client: ClientInfo {
                id: cfg.client.id.clone(),
                display_name: cfg.client.display_name.clone(),
                version,
                platform: cfg.client.platform.clone(),
                mode: cfg.client.mode.clone(),
                device_family: cfg.client.device_family.clone(),
                model_identifier: cfg.client.model_identifier.clone(),
                instance_id: cfg.client.instance_id.clone(),
            },
            role: cfg.node.role.clone(),
            scopes: cfg.node.scopes.clone(),
            locale: cfg.client.locale.clone(),
            reconnect: ReconnectPolicy::from_config(&cfg.gateway.reconnect),
            handshake_timeout: Duration::from_millis(cfg.gateway.handshake_timeout_ms),
            activity_capacity: cfg.node.activity_capacity,
        }
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Published on the node's broadcast channel.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    StateChanged(ConnectionState),
    /// Handshake finished.
    Connected { protocol: u32, tick_interval_ms: u64 },
    /// Any gateway event the engine does not consume itself.
    Gateway(EventFrame),
    /// Event sequence numbers skipped ahead.
    SequenceGap { expected: u64, received: u64 },
    CommandCompleted(ActivityRecord),
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub state: ConnectionState,
    pub pending_requests: usize,
    pub reconnect_attempts: u32,
    pub activity: Vec<ActivityRecord>,
}

enum NodeCommand {
    Connect,
    Disconnect,
    Request {
        id: String,
        method: String,
        params: Option<Value>,
        reply: Reply,
    },
    Abandon {
        id: String,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
    Shutdown,
}

/// Cheap-to-clone handle to a running [`GatewayNode`].
#[derive(Clone)]
pub struct NodeHandle {
    cmd_tx: mpsc::Sender<NodeCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<NodeEvent>,
    device_id: String,
}

impl NodeHandle {
    async fn send(&self, cmd: NodeCommand) -> Result<(), NodeError> {
        self.cmd_tx.send(cmd).await.map_err(|_| NodeError::Shutdown)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Start connecting. A no-op while already connecting or connected.
    pub async fn connect(&self) -> Result<(), NodeError> {
        self.send(NodeCommand::Connect).await
    }

    /// Close the connection and stop retrying.
    pub async fn disconnect(&self) -> Result<(), NodeError> {
        self.send(NodeCommand::Disconnect).await
    }

    /// Disconnect and stop the node task.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.send(NodeCommand::Shutdown).await
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, RequestError> {
        let (_, rx) = self.start_request(method.into(), params).await?;
        rx.await.unwrap_or(Err(RequestError::Shutdown))
    }

    /// Like [`request`](Self::request) but gives up after `timeout`.
    pub async fn request_with_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        let (id, rx) = self.start_request(method.into(), params).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(RequestError::Shutdown)),
            Err(_) => {
                let _ = self.cmd_tx.try_send(NodeCommand::Abandon { id });
                Err(RequestError::Timeout)
            }
        }
    }

    async fn start_request(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Result<(String, oneshot::Receiver<Result<Value, RequestError>>), RequestError> {
        let id = Uuid::new_v4().to_string();
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(NodeCommand::Request {
                id: id.clone(),
                method,
                params,
                reply,
            })
            .await
            .map_err(|_| RequestError::Shutdown)?;
        Ok((id, rx))
    }

    /// Emit a node-originated event (`node.event`).
    pub async fn send_node_event(
        &self,
        event: impl Into<String>,
        payload: Option<Value>,
    ) -> Result<Value, RequestError> {
        let params = NodeEventParams {
            event: event.into(),
            payload_json: payload.map(|p| p.to_string()),
        };
        let params = serde_json::to_value(params).map_err(|e| RequestError::Encode(e.to_string()))?;
        self.request(NODE_EVENT_METHOD, Some(params)).await
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `pred` (checked against the current
    /// value first).
    pub async fn wait_for_state(
        &self,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, NodeError> {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(pred).await.map_err(|_| NodeError::Shutdown)?;
        Ok(state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| NodeError::Shutdown)
    }
}

// ── Internal messages ─────────────────────────────────────────────────────────

/// Messages from spawned tasks back to the owner.
pub(crate) enum EngineEvent {
    Opened {
        generation: u64,
        pair: TransportPair,
    },
    OpenFailed {
        generation: u64,
        error: TransportError,
    },
    Inbound {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
        reason: String,
    },
    HandshakeTimeout {
        generation: u64,
    },
    KeepaliveTick {
        generation: u64,
    },
    RetryDue {
        generation: u64,
    },
    CommandDone {
        generation: u64,
        route: ReplyRoute,
        command: String,
        started: Instant,
        outcome: Result<Value, CommandError>,
    },
}

/// Where a command result goes.
pub(crate) enum ReplyRoute {
    /// `res` to a `node.invoke` request.
    Response { request_id: String },
    /// `node.invoke.result` request for a `node.invoke.request` event.
    InvokeResult { invoke_id: String, node_id: String },
}

struct Link {
    sink: Box<dyn FrameSink>,
    reader: JoinHandle<()>,
    /// Id of the in-flight `connect` request.
    connect_id: Option<String>,
}

#[derive(Default)]
struct Timers {
    open: Option<JoinHandle<()>>,
    handshake: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel_all(&mut self) {
        for task in [
            self.open.take(),
            self.handshake.take(),
            self.keepalive.take(),
            self.retry.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

fn after(delay: Duration, tx: mpsc::UnboundedSender<EngineEvent>, ev: EngineEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(ev);
    })
}

fn spawn_reader(
    mut source: Box<dyn FrameSource>,
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            match source.next_text().await {
                Some(Ok(text)) => {
                    if tx.send(EngineEvent::Inbound { generation, text }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "connection closed by gateway".to_string(),
            }
        };
        let _ = tx.send(EngineEvent::Closed { generation, reason });
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Owns the connection lifecycle. Run it with [`GatewayNode::run`].
pub struct GatewayNode {
    options: NodeOptions,
    template: ConnectTemplate,
    identity: DeviceIdentity,
    store: IdentityStore,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<CommandDispatcher>,

    cmd_rx: mpsc::Receiver<NodeCommand>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<NodeEvent>,

    machine: StateMachine,
    pending: PendingRequests,
    activity: ActivityLog,
    link: Option<Link>,
    timers: Timers,
    generation: u64,
    attempts: u32,
    user_disconnected: bool,
    last_seq: Option<u64>,
}

impl GatewayNode {
    /// Load (or create) the device identity and build the engine plus a
    /// handle to it. Nothing connects until [`NodeHandle::connect`].
    pub fn new(
        options: NodeOptions,
        store: IdentityStore,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Result<(Self, NodeHandle), NodeError> {
        let identity = store.load_or_create()?;
        let template = ConnectTemplate {
            client: options.client.clone(),
            role: options.role.clone(),
            scopes: options.scopes.clone(),
            caps: dispatcher.advertised_caps(),
            commands: dispatcher.advertised_commands(),
            locale: options.locale.clone(),
            user_agent: options.user_agent.clone(),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(256);

        let handle = NodeHandle {
            cmd_tx,
            state_rx,
            event_tx: event_tx.clone(),
            device_id: identity.device_id().to_string(),
        };

        let node = Self {
            activity: ActivityLog::new(options.activity_capacity),
            options,
            template,
            identity,
            store,
            connector,
            dispatcher,
            cmd_rx,
            engine_tx,
            engine_rx,
            state_tx,
            event_tx,
            machine: StateMachine::new(),
            pending: PendingRequests::new(),
            link: None,
            timers: Timers::default(),
            generation: 0,
            attempts: 0,
            user_disconnected: false,
            last_seq: None,
        };
        Ok((node, handle))
    }

    /// Run until [`NodeHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        info!(device_id = %self.identity.device_id(), url = %self.options.url, "node started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(NodeCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(ev) = self.engine_rx.recv() => self.handle_engine_event(ev).await,
            }
        }
        self.disconnect();
        info!("node stopped");
    }

    async fn handle_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::Connect => self.connect(),
            NodeCommand::Disconnect => self.disconnect(),
            NodeCommand::Request {
                id,
                method,
                params,
                reply,
            } => self.send_request(id, method, params, reply).await,
            NodeCommand::Abandon { id } => {
                if self.pending.abandon(&id) {
                    debug!(request_id = %id, "caller stopped waiting");
                }
            }
            NodeCommand::Snapshot { reply } => {
                let _ = reply.send(NodeSnapshot {
                    state: self.machine.current().clone(),
                    pending_requests: self.pending.len(),
                    reconnect_attempts: self.attempts,
                    activity: self.activity.snapshot(),
                });
            }
            NodeCommand::Shutdown => {}
        }
    }

    async fn handle_engine_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::Opened { generation, pair } => self.on_opened(generation, pair),
            EngineEvent::OpenFailed { generation, error } => {
                if generation == self.generation {
                    self.connection_failed(error.to_string());
                }
            }
            EngineEvent::Inbound { generation, text } => {
                if generation == self.generation {
                    self.on_frame(&text).await;
                } else {
                    debug!(generation, "frame from stale connection dropped");
                }
            }
            EngineEvent::Closed { generation, reason } => {
                if generation == self.generation && self.link.is_some() {
                    warn!(%reason, "gateway connection lost");
                    self.connection_failed(reason);
                }
            }
            EngineEvent::HandshakeTimeout { generation } => {
                if generation == self.generation
                    && *self.machine.current() == ConnectionState::Connecting
                {
                    warn!("gateway handshake timed out");
                    self.connection_failed("handshake timed out".to_string());
                }
            }
            EngineEvent::KeepaliveTick { generation } => {
                if generation != self.generation {
                    return;
                }
                if let Some(link) = self.link.as_mut() {
                    if let Err(e) = link.sink.ping().await {
                        warn!("keepalive ping failed: {e}");
                    }
                }
            }
            EngineEvent::RetryDue { generation } => {
                if generation == self.generation
                    && matches!(self.machine.current(), ConnectionState::Error(_))
                    && !self.user_disconnected
                {
                    self.open_connection();
                }
            }
            EngineEvent::CommandDone {
                generation,
                route,
                command,
                started,
                outcome,
            } => {
                self.finish_command(generation, route, command, started, outcome)
                    .await;
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState) -> bool {
        match self.machine.transition(next) {
            Ok(changed) => {
                if changed {
                    let state = self.machine.current().clone();
                    debug!(state = %state, "state changed");
                    self.state_tx.send_replace(state.clone());
                    let _ = self.event_tx.send(NodeEvent::StateChanged(state));
                }
                true
            }
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }

    fn connect(&mut self) {
        if self.machine.current().is_active() {
            debug!(state = %self.machine.current(), "connect ignored");
            return;
        }
        self.user_disconnected = false;
        self.attempts = 0;
        if let Some(retry) = self.timers.retry.take() {
            retry.abort();
        }
        self.open_connection();
    }

    fn open_connection(&mut self) {
        if !self.set_state(ConnectionState::Connecting) {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let connector = self.connector.clone();
        let url = self.options.url.clone();
        let tx = self.engine_tx.clone();
        info!(url = %url, attempt = self.attempts, "connecting to gateway");

        let deadline = self.options.handshake_timeout;

        self.timers.open = Some(tokio::spawn(async move {
            let ev = match tokio::time::timeout(deadline, connector.connect(&url)).await {
                Ok(Ok(pair)) => EngineEvent::Opened { generation, pair },
                Ok(Err(error)) => EngineEvent::OpenFailed { generation, error },
                Err(_) => EngineEvent::OpenFailed {
                    generation,
                    error: TransportError::Connect(format!(
                        "no connection within {} ms",
                        deadline.as_millis()
                    )),
                },
            };
            let _ = tx.send(ev);
        }));
    }

    fn on_opened(&mut self, generation: u64, pair: TransportPair) {
        let (mut sink, source) = pair;
        if generation != self.generation
            || *self.machine.current() != ConnectionState::Connecting
        {
            debug!(generation, "discarding connection opened after teardown");
            tokio::spawn(async move { sink.close().await });
            return;
        }
        self.timers.open = None;
        self.link = Some(Link {
            sink,
            reader: spawn_reader(source, generation, self.engine_tx.clone()),
            connect_id: None,
        });
        self.timers.handshake = Some(after(
            self.options.handshake_timeout,
            self.engine_tx.clone(),
            EngineEvent::HandshakeTimeout { generation },
        ));
        debug!("transport open; waiting for challenge");
    }

    /// Drop the current connection and everything tied to it.
    fn teardown(&mut self) {
        self.generation += 1;
        self.timers.cancel_all();
        if let Some(link) = self.link.take() {
            link.reader.abort();
            let mut sink = link.sink;
            tokio::spawn(async move { sink.close().await });
        }
        let rejected = self.pending.reject_all(RequestError::ConnectionLost);
        if rejected > 0 {
            debug!(count = rejected, "pending requests rejected");
        }
        self.last_seq = None;
    }

    /// Unexpected loss: go to `Error` and schedule the next attempt.
    fn connection_failed(&mut self, reason: String) {
        self.teardown();
        if self.user_disconnected {
            return;
        }
        self.attempts += 1;
        match self.options.reconnect.delay_for(self.attempts) {
            Some(delay) => {
                self.set_state(ConnectionState::Error(reason.clone()));
                warn!(
                    %reason,
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "gateway connection failed; retrying"
                );
                self.timers.retry = Some(after(
                    delay,
                    self.engine_tx.clone(),
                    EngineEvent::RetryDue {
                        generation: self.generation,
                    },
                ));
            }
            None => {
                self.set_state(ConnectionState::Error(MAX_ATTEMPTS_REASON.to_string()));
                warn!(%reason, attempts = self.attempts - 1, "giving up on gateway");
            }
        }
    }

    fn disconnect(&mut self) {
        self.user_disconnected = true;
        self.teardown();
        self.attempts = 0;
        if self.set_state(ConnectionState::Disconnected) {
            info!("disconnected from gateway");
        }
    }

    // ── Inbound frames ────────────────────────────────────────────────────────

    async fn on_frame(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("discarding inbound frame: {e}");
                return;
            }
        };
        match frame {
            Frame::Event(ev) => self.on_gateway_event(ev).await,
            Frame::Response(res) => {
                let is_connect = self
                    .link
                    .as_ref()
                    .and_then(|l| l.connect_id.as_deref())
                    == Some(res.id.as_str());
                if is_connect {
                    self.on_connect_response(res);
                } else {
                    self.pending.resolve(res);
                }
            }
            Frame::Request(req) => self.on_gateway_request(req).await,
        }
    }

    async fn on_gateway_event(&mut self, ev: EventFrame) {
        if let Some(seq) = ev.seq {
            self.track_seq(seq);
        }
        match ev.event.as_str() {
            CONNECT_CHALLENGE_EVENT => self.on_challenge(ev.payload).await,
            NODE_INVOKE_REQUEST_EVENT => self.on_invoke_event(ev.payload).await,
            _ => {
                let _ = self.event_tx.send(NodeEvent::Gateway(ev));
            }
        }
    }

    fn track_seq(&mut self, seq: u64) {
        if let Some(last) = self.last_seq {
            let expected = last + 1;
            if seq > expected {
                warn!(expected, received = seq, "gateway event sequence gap");
                let _ = self.event_tx.send(NodeEvent::SequenceGap {
                    expected,
                    received: seq,
                });
            }
            self.last_seq = Some(last.max(seq));
        } else {
            self.last_seq = Some(seq);
        }
    }

    async fn on_challenge(&mut self, payload: Value) {
        let awaiting = *self.machine.current() == ConnectionState::Connecting
            && self.link.as_ref().is_some_and(|l| l.connect_id.is_none());
        if !awaiting {
            debug!("connect challenge outside handshake ignored");
            return;
        }
        let challenge: ConnectChallenge = match serde_json::from_value(payload) {
            Ok(c) => c,
            Err(e) => {
                warn!("malformed connect challenge: {e}");
                return;
            }
        };

        let token = self.stored_token();
        let params = self.template.build(
            &self.identity,
            self.dispatcher.permissions(),
            token.as_deref(),
            &challenge.nonce,
            Utc::now().timestamp_millis(),
        );
        let params = match serde_json::to_value(&params) {
            Ok(v) => v,
            Err(e) => {
                warn!("could not encode connect params: {e}");
                return;
            }
        };
        let (id, frame) = Frame::request(CONNECT_METHOD, Some(params));
        if let Some(link) = self.link.as_mut() {
            link.connect_id = Some(id);
        }
        debug!(has_token = token.is_some(), "sending connect");
        if let Err(e) = self.send_frame(&frame).await {
            self.connection_failed(e.to_string());
        }
    }

    fn stored_token(&self) -> Option<String> {
        match self
            .store
            .load_token(self.identity.device_id(), &self.options.role)
        {
            Ok(token) => token.map(|t| t.token),
            Err(e) => {
                warn!("could not read session token: {e}");
                None
            }
        }
    }

    fn on_connect_response(&mut self, res: ResponseFrame) {
        if let Some(link) = self.link.as_mut() {
            link.connect_id = None;
        }
        if !res.ok {
            let reason = res
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "connect rejected".to_string());
            warn!(%reason, "gateway rejected connect");
            self.connection_failed(reason);
            return;
        }
        let hello = match res.payload.map(serde_json::from_value::<HelloOk>) {
            Some(Ok(hello)) if hello.kind == HELLO_OK => hello,
            _ => {
                self.connection_failed("unexpected connect response".to_string());
                return;
            }
        };

        if let Some(timer) = self.timers.handshake.take() {
            timer.abort();
        }
        if !self.set_state(ConnectionState::Connected) {
            return;
        }
        self.attempts = 0;
        self.last_seq = None;

        if let Some(auth) = &hello.auth {
            if let Some(token) = &auth.device_token {
                let role = auth.role.as_deref().unwrap_or(&self.options.role);
                if let Err(e) =
                    self.store
                        .store_token(self.identity.device_id(), role, token, &auth.scopes)
                {
                    warn!("could not persist session token: {e}");
                }
            }
        }

        let tick_ms = match hello.policy.tick_interval_ms {
            0 => DEFAULT_TICK_INTERVAL_MS,
            ms => ms,
        };
        self.timers.keepalive = Some(spawn_keepalive(
            Duration::from_millis(tick_ms),
            self.generation,
            self.engine_tx.clone(),
        ));
        info!(protocol = hello.protocol, tick_interval_ms = tick_ms, "connected to gateway");
        let _ = self.event_tx.send(NodeEvent::Connected {
            protocol: hello.protocol,
            tick_interval_ms: tick_ms,
        });
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn on_gateway_request(&mut self, req: RequestFrame) {
        let route = ReplyRoute::Response {
            request_id: req.id.clone(),
        };
        if req.method != NODE_INVOKE_METHOD {
            debug!(method = %req.method, "unsupported gateway request");
            self.deliver(
                route,
                Err(CommandError::unknown_command(&req.method)),
            )
            .await;
            return;
        }

        let invoke = req
            .params
            .map(serde_json::from_value::<NodeInvokeParams>)
            .transpose();
        match invoke {
            Ok(Some(invoke)) => match invoke.resolved_params() {
                Ok(params) => self.spawn_command(route, invoke.command, params, None),
                Err(msg) => {
                    self.reject_invocation(route, invoke.command, msg).await;
                }
            },
            Ok(None) => {
                self.reject_invocation(route, NODE_INVOKE_METHOD.into(), "missing params".into())
                    .await;
            }
            Err(e) => {
                self.reject_invocation(route, NODE_INVOKE_METHOD.into(), e.to_string())
                    .await;
            }
        }
    }

    async fn on_invoke_event(&mut self, payload: Value) {
        let req: NodeInvokeRequest = match serde_json::from_value(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("malformed {NODE_INVOKE_REQUEST_EVENT}: {e}");
                return;
            }
        };
        let route = ReplyRoute::InvokeResult {
            invoke_id: req.id.clone(),
            node_id: req.node_id.clone(),
        };
        match req.resolved_params() {
            Ok(params) => {
                let deadline = req.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis);
                self.spawn_command(route, req.command, params, deadline)
            }
            Err(msg) => self.reject_invocation(route, req.command, msg).await,
        }
    }

    /// Run a command off the owner task. Whatever happens to the
    /// collaborator (error, panic, deadline) ends in exactly one
    /// `CommandDone`.
    fn spawn_command(
        &mut self,
        route: ReplyRoute,
        command: String,
        params: Option<Value>,
        deadline: Option<Duration>,
    ) {
        let dispatcher = self.dispatcher.clone();
        let tx = self.engine_tx.clone();
        let generation = self.generation;
        debug!(%command, "invoking command");
        tokio::spawn(async move {
            let started = Instant::now();
            let run = AssertUnwindSafe(dispatcher.dispatch(&command, params)).catch_unwind();
            let finished = match deadline {
                Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| limit),
                None => Ok(run.await),
            };
            let outcome = match finished {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => {
                    let msg = panic_message(panic.as_ref());
                    error!(%command, "command handler panicked: {msg}");
                    Err(CommandError::unexpected(format!("{command} failed: {msg}")))
                }
                Err(limit) => {
                    warn!(%command, timeout_ms = limit.as_millis() as u64, "command timed out");
                    Err(CommandError::unexpected(format!(
                        "{command} timed out after {} ms",
                        limit.as_millis()
                    )))
                }
            };
            let _ = tx.send(EngineEvent::CommandDone {
                generation,
                route,
                command,
                started,
                outcome,
            });
        });
    }

    async fn reject_invocation(&mut self, route: ReplyRoute, command: String, msg: String) {
        let generation = self.generation;
        self.finish_command(
            generation,
            route,
            command,
            Instant::now(),
            Err(CommandError::invalid_params(msg)),
        )
        .await;
    }

    async fn finish_command(
        &mut self,
        generation: u64,
        route: ReplyRoute,
        command: String,
        started: Instant,
        outcome: Result<Value, CommandError>,
    ) {
        let record = ActivityRecord {
            timestamp: Utc::now(),
            command: command.clone(),
            succeeded: outcome.is_ok(),
            classification: match &outcome {
                Ok(_) => "ok".to_string(),
                Err(e) => e.code.as_str().to_string(),
            },
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.activity.push(record.clone());
        let _ = self.event_tx.send(NodeEvent::CommandCompleted(record));

        if generation != self.generation || self.link.is_none() {
            warn!(%command, "command result undeliverable; its connection is gone");
            return;
        }
        self.deliver(route, outcome).await;
    }

    /// Send exactly one result for an invocation.
    async fn deliver(&mut self, route: ReplyRoute, outcome: Result<Value, CommandError>) {
        let (frame, tracked) = match route {
            ReplyRoute::Response { request_id } => {
                let res = match outcome {
                    Ok(payload) => ResponseFrame::success(request_id, payload),
                    Err(e) => ResponseFrame::failure(request_id, e.to_shape()),
                };
                (Frame::Response(res), None)
            }
            ReplyRoute::InvokeResult { invoke_id, node_id } => {
                let (ok, payload, error) = match outcome {
                    Ok(payload) => (true, Some(payload), None),
                    Err(e) => (false, None, Some(e.to_shape())),
                };
                let result = NodeInvokeResult {
                    id: invoke_id,
                    node_id,
                    ok,
                    payload,
                    error,
                };
                let params = match serde_json::to_value(result) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("could not encode invoke result: {e}");
                        return;
                    }
                };
                let (id, frame) = Frame::request(NODE_INVOKE_RESULT_METHOD, Some(params));
                // Nobody awaits the gateway's ack; tracking it keeps the
                // response from being logged as unknown.
                let (ack, _) = oneshot::channel();
                self.pending.insert(id.clone(), NODE_INVOKE_RESULT_METHOD, ack);
                (frame, Some(id))
            }
        };
        if let Err(e) = self.send_frame(&frame).await {
            warn!("could not send command result: {e}");
            if let Some(id) = tracked {
                self.pending.abandon(&id);
            }
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    async fn send_request(
        &mut self,
        id: String,
        method: String,
        params: Option<Value>,
        reply: Reply,
    ) {
        if !self.machine.current().is_connected() {
            let _ = reply.send(Err(RequestError::NotConnected));
            return;
        }
        let frame = Frame::Request(RequestFrame {
            id: id.clone(),
            method: method.clone(),
            params,
        });
        self.pending.insert(id.clone(), method, reply);
        if let Err(e) = self.send_frame(&frame).await {
            warn!(request_id = %id, "request not sent: {e}");
            self.pending.fail(&id, RequestError::ConnectionLost);
        }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let text = encode_frame(frame).map_err(|e| TransportError::Send(e.to_string()))?;
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;
        link.sink.send_text(text).await
    }
}
