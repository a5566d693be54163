//! # Connection
//!
//! One end of an established byte stream: key material, handshake progress, the
//! pre-ready send queue, per-connection handlers and bookkeeping.
//!
//! ## Concurrency
//! - A single read task per connection pulls frames through [`FrameCodec`] and
//!   processes each one to completion before the next read
//! - Sending is synchronous and callable from any thread. The session lock is held
//!   from encoding until the frame is queued for the writer task, so frames reach
//!   the wire whole and in send order
//! - Retirement cancels both tasks; frames already handed to the writer are flushed
//!   first, everything still queued for READY is dropped
//!
//! ## Example
//! ```rust,no_run
//! use framelink::config::ProtocolConfig;
//! use framelink::protocol::connection::Connection;
//! use framelink::protocol::context::ProtocolContext;
//!
//! # async fn run(stream: tokio::net::TcpStream) -> framelink::error::Result<()> {
//! let context = ProtocolContext::new(ProtocolConfig::default());
//! let connection = Connection::connect(context, stream)?;
//! connection.wait_ready().await?;
//! connection.ping()?;
//! # Ok(())
//! # }
//! ```

use crate::core::codec::FrameCodec;
use crate::core::frame::RawFrame;
use crate::core::pipeline::{KeyRing, TransformSet};
use crate::core::serialization::SerializationKind;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::context::ProtocolContext;
use crate::protocol::credentials::{hash_with_salt, sha256_hex};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{Effects, HandshakeState, Rotation};
use crate::protocol::message::{class, control, system, Message, Outcome, Value};
use crate::utils::crypto::EncryptionKind;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which end of the stream this connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepting side. Issues the session key and assigns canonical identifiers.
    Server,
    /// Connecting side
    Client,
}

impl Role {
    pub fn is_authoritative(self) -> bool {
        self == Role::Server
    }
}

/// Why a connection was retired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    /// True for a DISCONNECT exchange, false for transport and protocol failures
    pub expected: bool,
    pub reason: String,
}

impl Disconnection {
    pub fn expected(reason: impl Into<String>) -> Self {
        Self {
            expected: true,
            reason: reason.into(),
        }
    }

    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self {
            expected: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One entry of the exchange log
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRecord {
    pub direction: Direction,
    pub message: Message,
}

#[derive(Debug)]
struct Queued {
    message: Message,
    transforms: TransformSet,
}

/// State guarded by the per-connection send lock
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) handshake: HandshakeState,
    pub(crate) keys: KeyRing,
    pub(crate) rotation: Option<Rotation>,
    pub(crate) serialization: SerializationKind,
    pub(crate) salt: Option<String>,
    queue: VecDeque<Queued>,
}

type Listener = Arc<dyn Fn(&Connection) + Send + Sync>;
type DisconnectListener = Arc<dyn Fn(&Connection, &Disconnection) + Send + Sync>;

#[derive(Default)]
struct Events {
    ready: Mutex<Vec<Listener>>,
    key_rotated: Mutex<Vec<Listener>>,
    admin_granted: Mutex<Vec<Listener>>,
    disconnect: Mutex<Vec<DisconnectListener>>,
}

struct Inner {
    context: Arc<ProtocolContext>,
    role: Role,
    id: AtomicU64,
    session: Mutex<Session>,
    state: watch::Sender<HandshakeState>,
    outbound: mpsc::UnboundedSender<RawFrame>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<RawFrame>>>,
    cancel: CancellationToken,
    alive: AtomicBool,
    admin: AtomicBool,
    dispatcher: Dispatcher,
    events: Events,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    exchange_log: Mutex<VecDeque<ExchangeRecord>>,
}

/// Cheaply cloneable handle to one connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.inner.role)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a detached connection in `Init`.
    ///
    /// Frames sent before [`Connection::attach`] are buffered for the writer. Splitting
    /// creation from attachment lets callers register handlers before any frame flows.
    pub fn new(context: Arc<ProtocolContext>, role: Role) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(HandshakeState::Init);
        let id = context.allocate_provisional_id();

        let session = Session {
            handshake: HandshakeState::Init,
            keys: KeyRing::new(),
            rotation: None,
            serialization: context.config().connection.serialization,
            salt: None,
            queue: VecDeque::new(),
        };

        let connection = Self {
            inner: Arc::new(Inner {
                context,
                role,
                id: AtomicU64::new(id),
                session: Mutex::new(session),
                state,
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                cancel: CancellationToken::new(),
                alive: AtomicBool::new(true),
                admin: AtomicBool::new(false),
                dispatcher: Dispatcher::new(),
                events: Events::default(),
                frames_sent: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
                exchange_log: Mutex::new(VecDeque::new()),
            }),
        };

        let metrics = connection.inner.context.metrics();
        metrics.connection_established();
        metrics.handshake_attempt();

        // The connecting side is known under its provisional id until IDENTITY arrives
        if role == Role::Client {
            if let Err(e) = connection
                .inner
                .context
                .connections()
                .insert(id, connection.clone())
            {
                warn!(connection_id = id, error = %e, "Failed to register provisional connection");
            }
        }

        debug!(connection_id = id, ?role, "Connection created");
        connection
    }

    /// Server-side connection over an accepted stream
    pub fn accept<S>(context: Arc<ProtocolContext>, stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Self::new(context, Role::Server);
        connection.attach(stream)?;
        Ok(connection)
    }

    /// Client-side connection over a connected stream
    pub fn connect<S>(context: Arc<ProtocolContext>, stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = Self::new(context, Role::Client);
        connection.attach(stream)?;
        Ok(connection)
    }

    /// Bind the connection to `stream` and spawn its read and write tasks.
    ///
    /// The client starts the handshake here when `client_initiates_handshake` is set.
    ///
    /// # Errors
    /// Outside a Tokio runtime, or when the connection is already attached or retired.
    pub fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProtocolError::Custom(format!("No Tokio runtime: {e}")))?;
        self.ensure_alive()?;

        let outbound_rx = self
            .inner
            .outbound_rx
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .take()
            .ok_or_else(|| ProtocolError::Custom("Connection already attached".to_string()))?;

        let transport = &self.inner.context.config().transport;
        let (reader, writer) = tokio::io::split(stream);
        let frames = FramedRead::with_capacity(
            reader,
            FrameCodec::new(transport.max_frame_length),
            transport.read_buffer_size,
        );
        let sink = FramedWrite::new(writer, FrameCodec::new(transport.max_frame_length));

        runtime.spawn(read_loop(self.clone(), frames));
        runtime.spawn(write_loop(self.clone(), sink, outbound_rx));

        if self.inner.role == Role::Client
            && self.inner.context.config().connection.client_initiates_handshake
        {
            self.start_handshake()?;
        }
        Ok(())
    }

    // ===== Accessors =====

    /// Canonical id once the handshake completed, provisional before
    pub fn id(&self) -> u64 {
        self.inner.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u64) {
        self.inner.id.store(id, Ordering::Release);
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn context(&self) -> &Arc<ProtocolContext> {
        &self.inner.context
    }

    pub fn handshake_state(&self) -> HandshakeState {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.is_alive() && self.handshake_state() == HandshakeState::Ready
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    pub fn is_admin(&self) -> bool {
        self.inner.admin.load(Ordering::Acquire)
    }

    pub(crate) fn set_admin(&self, admin: bool) {
        self.inner.admin.store(admin, Ordering::Release);
    }

    /// Per-session hashing salt dispatched with the canonical identifier
    pub fn salt(&self) -> Option<String> {
        self.lock_session().ok().and_then(|s| s.salt.clone())
    }

    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    /// Copy of the exchange log, oldest first
    pub fn exchange_log(&self) -> Vec<ExchangeRecord> {
        self.inner
            .exchange_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// SHA-256 of the current session key, comparable across both ends
    pub fn session_fingerprint(&self) -> Option<[u8; 32]> {
        self.lock_session()
            .ok()
            .and_then(|s| s.keys.session().map(|key| key.fingerprint()))
    }

    /// Hash `secret` with Argon2 under the session salt, or SHA-256 before one exists
    pub fn hash_secret(&self, secret: &str) -> Result<String> {
        match self.salt() {
            Some(salt) => hash_with_salt(secret, &salt),
            None => Ok(sha256_hex(secret)),
        }
    }

    /// Whether both handles refer to the same connection
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ===== Handlers and events =====

    /// Handler for every message of `class` received on this connection
    pub fn on_class<F>(&self, class: u8, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_class(class, handler)
    }

    /// Handler for `(class, subclass)` messages received on this connection
    pub fn on_route<F>(&self, class: u8, subclass: u8, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_route(class, subclass, handler)
    }

    pub fn on_ready<F>(&self, listener: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        add_listener(&self.inner.events.ready, listener);
    }

    pub fn on_key_rotated<F>(&self, listener: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        add_listener(&self.inner.events.key_rotated, listener);
    }

    pub fn on_admin_granted<F>(&self, listener: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        add_listener(&self.inner.events.admin_granted, listener);
    }

    pub fn on_disconnect<F>(&self, listener: F)
    where
        F: Fn(&Connection, &Disconnection) + Send + Sync + 'static,
    {
        let listener: DisconnectListener = Arc::new(listener);
        add_listener(&self.inner.events.disconnect, listener);
    }

    // ===== Sending =====

    /// Transforms applied to application messages unless overridden
    pub fn default_transforms(&self) -> Result<TransformSet> {
        let session = self.lock_session()?;
        Ok(self.defaults(&session))
    }

    /// Send with the connection's default transforms.
    ///
    /// Before READY, and while a key rotation is in flight, the message is queued and
    /// sent in submission order once the connection is usable.
    pub fn send(&self, message: Message) -> Result<()> {
        self.ensure_alive()?;
        let mut session = self.lock_session()?;
        let transforms = self.defaults(&session);
        self.submit(&mut session, message, transforms)
    }

    /// Like [`Connection::send`] with explicit transforms
    pub fn send_with(&self, message: Message, transforms: TransformSet) -> Result<()> {
        self.ensure_alive()?;
        let mut session = self.lock_session()?;
        self.submit(&mut session, message, transforms)
    }

    /// Liveness probe on SYSTEM / PING
    pub fn ping(&self) -> Result<()> {
        self.send(Message::ok(class::SYSTEM, system::PING, Vec::new()))
    }

    /// Tell the peer why, then retire. A retired connection is left untouched.
    ///
    /// The connection is retired even when the notice could not be sent.
    pub fn disconnect(&self, reason: &str) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let notice = self.lock_session().and_then(|mut session| {
            self.send_control(
                &mut session,
                control::DISCONNECT,
                Outcome::OK,
                vec![Value::from(reason)],
                EncryptionKind::Symmetric,
            )
        });
        self.retire(Disconnection::expected(reason));
        notice
    }

    /// Resolves once READY is reached.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionClosed` when the connection retires first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        tokio::select! {
            biased;
            reached = state.wait_for(|s| *s == HandshakeState::Ready) => {
                reached.map(|_| ()).map_err(|_| ProtocolError::ConnectionClosed)
            }
            _ = self.inner.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Resolves once the connection is retired
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    fn defaults(&self, session: &Session) -> TransformSet {
        let config = &self.inner.context.config().connection;
        TransformSet {
            serialization: session.serialization,
            compression: config.compression,
            encryption: config.encryption,
            fallback_encryption: config.fallback_encryption,
        }
    }

    fn submit(&self, session: &mut Session, message: Message, transforms: TransformSet) -> Result<()> {
        if !message.is_control()
            && (session.handshake != HandshakeState::Ready || session.rotation.is_some())
        {
            debug!(
                connection_id = self.id(),
                class = message.class(),
                subclass = message.subclass(),
                queued = session.queue.len() + 1,
                "Connection not ready, message queued"
            );
            session.queue.push_back(Queued {
                message,
                transforms,
            });
            return Ok(());
        }
        self.transmit(session, message, transforms)
    }

    /// Encode and hand one frame to the writer. Caller holds the session lock.
    pub(crate) fn transmit(
        &self,
        session: &mut Session,
        mut message: Message,
        transforms: TransformSet,
    ) -> Result<()> {
        if self.inner.role.is_authoritative() {
            message.mark_intercepted();
        }

        let context = &self.inner.context;
        let encoded = context.pipeline().encode(&session.keys, &message, transforms)?;
        let wire_len = encoded.frame.encoded_len() as u64;

        self.inner
            .outbound
            .send(encoded.frame)
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let metrics = context.metrics();
        metrics.frame_sent(wire_len);
        if encoded.serialization_fallback {
            metrics.serialization_fallback();
        }
        if encoded.encryption_fallback {
            metrics.encryption_fallback();
        }
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.record(Direction::Sent, message);
        Ok(())
    }

    /// Send everything queued while the connection was not usable, in order
    pub(crate) fn flush_queue(&self, session: &mut Session) {
        let pending = std::mem::take(&mut session.queue);
        if !pending.is_empty() {
            debug!(connection_id = self.id(), count = pending.len(), "Flushing queued messages");
        }
        for queued in pending {
            if let Err(e) = self.transmit(session, queued.message, queued.transforms) {
                warn!(connection_id = self.id(), error = %e, "Dropped queued message");
            }
        }
    }

    // ===== Handshake plumbing =====

    pub(crate) fn lock_session(&self) -> Result<MutexGuard<'_, Session>> {
        self.inner
            .session
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_SESSION_LOCK.to_string()))
    }

    /// Move the handshake forward. Earlier or equal states are ignored.
    pub(crate) fn advance(&self, session: &mut Session, next: HandshakeState) {
        if next <= session.handshake {
            return;
        }
        debug!(
            connection_id = self.id(),
            from = ?session.handshake,
            to = ?next,
            "Handshake advanced"
        );
        session.handshake = next;
        self.inner.state.send_replace(next);
    }

    pub(crate) fn become_ready(&self, session: &mut Session) {
        self.advance(session, HandshakeState::Ready);
        self.inner.context.metrics().handshake_success();
        self.flush_queue(session);
    }

    pub(crate) fn suspicious(&self, what: &'static str) {
        self.inner.context.metrics().suspicious_message();
        warn!(connection_id = self.id(), reason = what, "Suspicious control message ignored");
    }

    // ===== Receiving =====

    fn process_frame(&self, frame: RawFrame) -> Result<()> {
        let (message, effects) = {
            let mut session = self.lock_session()?;
            let mut message = self
                .inner
                .context
                .pipeline()
                .decode(&session.keys, frame)?;
            if self.inner.role.is_authoritative() {
                message.mark_intercepted();
            }
            let effects = if message.is_control() {
                self.handle_control(&mut session, &message)?
            } else {
                Effects::default()
            };
            (message, effects)
        };

        self.deliver(&message);
        self.apply(effects);
        Ok(())
    }

    /// Bookkeeping, then process-wide interceptors, this connection's handlers and the
    /// process-wide handlers, in that order
    fn deliver(&self, message: &Message) {
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
        self.record(Direction::Received, message.clone());

        let shared = self.inner.context.dispatcher();
        let failures = [
            shared.intercept(self, message),
            self.inner.dispatcher.dispatch(self, message),
            shared.dispatch(self, message),
        ]
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|e| {
                warn!(connection_id = self.id(), error = %e, "Dispatch skipped");
                0
            })
        })
        .sum::<usize>();

        let metrics = self.inner.context.metrics();
        for _ in 0..failures {
            metrics.handler_failure();
        }
    }

    fn apply(&self, effects: Effects) {
        if effects.ready {
            info!(connection_id = self.id(), role = ?self.inner.role, "Connection ready");
            self.fire(&self.inner.events.ready);
        }
        if effects.key_rotated {
            debug!(connection_id = self.id(), "Key rotation complete");
            self.fire(&self.inner.events.key_rotated);
        }
        if effects.admin_granted {
            self.fire(&self.inner.events.admin_granted);
        }
        if let Some(reason) = effects.disconnect {
            if let Err(e) = self.disconnect(&reason) {
                warn!(connection_id = self.id(), error = %e, "Disconnect notice not sent");
            }
        }
        if let Some(disconnection) = effects.retire {
            self.retire(disconnection);
        }
    }

    fn record(&self, direction: Direction, message: Message) {
        let config = &self.inner.context.config().connection;
        if !config.log_exchanges || config.exchange_log_capacity == 0 {
            return;
        }
        if let Ok(mut log) = self.inner.exchange_log.lock() {
            if log.len() == config.exchange_log_capacity {
                log.pop_front();
            }
            log.push_back(ExchangeRecord { direction, message });
        }
    }

    fn fire(&self, listeners: &Mutex<Vec<Listener>>) {
        for listener in snapshot(listeners) {
            if catch_unwind(AssertUnwindSafe(|| listener(self))).is_err() {
                self.inner.context.metrics().handler_failure();
                warn!(connection_id = self.id(), "Event listener panicked");
            }
        }
    }

    // ===== Retirement =====

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed)
        }
    }

    /// Terminate after a read-side failure.
    ///
    /// Transport errors retire quietly. Anything else is a corrupt stream or a frame we
    /// cannot trust: the peer gets a best-effort DISCONNECT carrying the diagnostic.
    fn abort_on_error(&self, err: ProtocolError) {
        match err {
            ProtocolError::Io(e) => {
                self.retire(Disconnection::unexpected(format!("I/O error: {e}")));
            }
            ProtocolError::ConnectionClosed => {
                self.retire(Disconnection::unexpected(constants::ERR_CONNECTION_CLOSED));
            }
            other => {
                let reason = other.to_string();
                error!(connection_id = self.id(), error = %reason, "Dropping connection");
                self.inner.context.metrics().framing_error();

                if let Ok(mut session) = self.lock_session() {
                    let _ = self.send_control(
                        &mut session,
                        control::DISCONNECT,
                        Outcome::MALFORMED,
                        vec![Value::from(reason.as_str())],
                        EncryptionKind::Symmetric,
                    );
                }
                self.retire(Disconnection::unexpected(reason));
            }
        }
    }

    /// Stop both tasks, drop queued sends and key material, unregister and notify.
    /// Only the first call has any effect.
    pub(crate) fn retire(&self, disconnection: Disconnection) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();

        let reached_ready = match self.inner.session.lock() {
            Ok(mut session) => {
                session.queue.clear();
                session.keys.clear();
                session.rotation = None;
                session.handshake == HandshakeState::Ready
            }
            Err(_) => false,
        };

        let context = &self.inner.context;
        if let Err(e) = context.connections().remove_if_same(self.id(), self) {
            warn!(connection_id = self.id(), error = %e, "Failed to unregister connection");
        }
        context.metrics().connection_closed();
        if !reached_ready {
            context.metrics().handshake_failed();
        }

        if disconnection.expected {
            info!(connection_id = self.id(), reason = %disconnection.reason, "Connection closed");
        } else {
            warn!(connection_id = self.id(), reason = %disconnection.reason, "Connection lost");
        }

        for listener in snapshot(&self.inner.events.disconnect) {
            if catch_unwind(AssertUnwindSafe(|| listener(self, &disconnection))).is_err() {
                context.metrics().handler_failure();
                warn!(connection_id = self.id(), "Disconnect listener panicked");
            }
        }
    }
}

fn add_listener<T: ?Sized>(listeners: &Mutex<Vec<Arc<T>>>, listener: Arc<T>) {
    match listeners.lock() {
        Ok(mut list) => list.push(listener),
        Err(_) => warn!("{}", constants::ERR_LOCK_POISONED),
    }
}

fn snapshot<T: ?Sized>(listeners: &Mutex<Vec<Arc<T>>>) -> Vec<Arc<T>> {
    listeners.lock().map(|list| list.clone()).unwrap_or_default()
}

async fn read_loop<R>(connection: Connection, mut frames: FramedRead<R, FrameCodec>)
where
    R: AsyncRead + Unpin,
{
    let cancel = connection.inner.cancel.clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                connection
                    .inner
                    .context
                    .metrics()
                    .frame_received(frame.encoded_len() as u64);
                if let Err(e) = connection.process_frame(frame) {
                    connection.abort_on_error(e);
                    break;
                }
            }
            Some(Err(e)) => {
                connection.abort_on_error(e);
                break;
            }
            None => {
                connection.retire(Disconnection::unexpected("Connection closed by peer"));
                break;
            }
        }
    }
    debug!(connection_id = connection.id(), "Read loop finished");
}

async fn write_loop<W>(
    connection: Connection,
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<RawFrame>,
) where
    W: AsyncWrite + Unpin,
{
    let cancel = connection.inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    connection.abort_on_error(e);
                    break;
                }
            }
            _ = cancel.cancelled() => {
                // Frames handed over before retirement (a DISCONNECT notice) still go out
                while let Ok(frame) = outbound.try_recv() {
                    if sink.feed(frame).await.is_err() {
                        break;
                    }
                }
                let _ = sink.flush().await;
                let _ = sink.get_mut().shutdown().await;
                break;
            }
        }
    }
    debug!(connection_id = connection.id(), "Write loop finished");
}
