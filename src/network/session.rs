//! Session Module
//!
//! One logical conversation with a directory server over one transport.
//!
//! ## Lifecycle
//! ```text
//!   Idle ──establish──▶ Connected ──bind ok──▶ Bound
//!                          │  ▲                  │
//!                          │  └──bind failed─────┤
//!                          ▼                     ▼
//!                       Unbound ◀──close / transport lost / notice
//! ```
//!
//! ## Concurrency Model
//! - **Writes**: serialized by the transport mutex, one frame at a time
//! - **Reads**: a single receive loop thread, started on the first request
//! - **Correlation**: the pending table maps message ID to the waiter's
//!   channel; the receive loop removes an entry when it delivers the final
//!   message for that ID
//!
//! Requests may be pipelined: any number can be outstanding at once and
//! responses may arrive in any order.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{LdapError, Result};
use crate::protocol::{
    encode_message, read_message, write_message, BindAuth, Control, LdapMessage, LdapResult,
    MessageId, ProtocolOp, ResultCode, MAX_MESSAGE_ID, NOTICE_OF_DISCONNECTION_OID,
    START_TLS_OID,
};
use super::connection::ReceiveLoop;
use super::transport::{SecurityUpgrade, TcpTransport, Transport};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport not yet established
    Idle,
    /// Transport up, anonymous identity
    Connected,
    /// Authenticated identity established
    Bound,
    /// Terminal: closed locally or lost
    Unbound,
}

/// Identity the server associates with the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindIdentity {
    Anonymous,
    Bound(String),
}

/// One SASL mechanism driving a multi-step bind
///
/// The session sends `initial_response`, then feeds every server challenge
/// to `step` while the server answers "bind in progress".
pub trait SaslMechanism {
    fn name(&self) -> &str;

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>>;

    fn step(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Identity recorded once the exchange succeeds
    fn identity(&self) -> String;
}

// =============================================================================
// Shared State
// =============================================================================

/// Why a session ended
#[derive(Debug, Clone)]
pub(crate) enum Termination {
    Closed,
    TransportLost(String),
    Malformed(String),
    Truncated(String),
    Disconnected(String),
}

impl Termination {
    fn to_error(&self) -> LdapError {
        match self {
            Termination::Closed => LdapError::InvalidSessionState("session is closed".to_string()),
            Termination::TransportLost(reason) => LdapError::Connection(reason.clone()),
            Termination::Malformed(reason) => LdapError::MalformedMessage(reason.clone()),
            Termination::Truncated(reason) => LdapError::TruncatedMessage(reason.clone()),
            Termination::Disconnected(reason) => {
                LdapError::Connection(format!("server sent notice of disconnection: {}", reason))
            }
        }
    }
}

struct Lifecycle {
    state: SessionState,
    termination: Option<Termination>,
}

/// State shared between the session and its receive loop
pub(crate) struct Shared {
    /// Outstanding requests: message ID -> waiter
    pending: Mutex<HashMap<MessageId, Sender<LdapMessage>>>,

    lifecycle: Mutex<Lifecycle>,

    /// Write side of the transport; `None` once released
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Shared {
    fn new(state: SessionState, transport: Box<dyn Transport>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle {
                state,
                termination: None,
            }),
            transport: Mutex::new(Some(transport)),
        }
    }

    fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    /// Move between live states; a terminated session stays terminated
    fn set_state(&self, state: SessionState) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != SessionState::Unbound {
            lifecycle.state = state;
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lifecycle.lock().termination.is_some()
    }

    /// End the session and fail every outstanding request
    ///
    /// The first reason wins. Dropping the senders wakes each waiter, which
    /// then reads the reason through `termination_error`.
    pub(crate) fn terminate(&self, reason: Termination) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.termination.is_some() {
                return;
            }
            tracing::debug!("Session terminated: {:?}", reason);
            lifecycle.termination = Some(reason);
            lifecycle.state = SessionState::Unbound;
        }
        let drained = std::mem::take(&mut *self.pending.lock());
        drop(drained);
    }

    fn termination_error(&self) -> Option<LdapError> {
        self.lifecycle
            .lock()
            .termination
            .as_ref()
            .map(Termination::to_error)
    }

    /// Route a message to its waiter; false if nobody is waiting for it
    pub(crate) fn deliver(&self, message: LdapMessage) -> bool {
        let sender = {
            let mut pending = self.pending.lock();
            if message.op.is_final() {
                pending.remove(&message.id)
            } else {
                pending.get(&message.id).cloned()
            }
        };

        match sender {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Shut down and drop the transport after the session ended
    ///
    /// Waits at most `wait` for a writer holding the transport; if it is still
    /// busy the session releases it on its next call or on drop instead.
    pub(crate) fn release_transport_within(&self, peer: &str, wait: Duration) {
        let transport = match self.transport.try_lock_for(wait) {
            Some(mut guard) => guard.take(),
            None => {
                tracing::debug!("Transport of {} busy, release deferred", peer);
                return;
            }
        };
        if let Some(transport) = transport {
            if let Err(e) = transport.shutdown() {
                tracing::debug!("Shutdown of {} failed: {}", peer, e);
            }
        }
    }

    fn register(&self, id: MessageId) -> Receiver<LdapMessage> {
        let (tx, rx) = channel::unbounded();
        self.pending.lock().insert(id, tx);
        rx
    }

    fn forget(&self, id: MessageId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }
}

// =============================================================================
// Pending Response
// =============================================================================

/// Handle on one outstanding request
///
/// Dropping the handle removes the request from the pending table, so a
/// response arriving afterwards is discarded.
pub struct PendingResponse<'a> {
    session: &'a Session,
    id: MessageId,
    rx: Receiver<LdapMessage>,
    deadline: Instant,
    timeout: Duration,
}

impl<'a> PendingResponse<'a> {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for the next message of this request
    ///
    /// All messages of one request share a single deadline.
    pub fn recv(&self) -> Result<LdapMessage> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => {
                self.session.shared.forget(self.id);
                tracing::debug!(
                    "Message {} timed out after {:?} waiting on {}",
                    self.id,
                    self.timeout,
                    self.session.peer
                );
                Err(LdapError::OperationTimeout(self.timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self
                .session
                .shared
                .termination_error()
                .unwrap_or(LdapError::Abandoned(self.id))),
        }
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.session.shared.forget(self.id);
    }
}

// =============================================================================
// Session
// =============================================================================

/// A client session with a directory server
pub struct Session {
    config: ClientConfig,

    /// Pending table and lifecycle shared with the receive loop
    shared: Arc<Shared>,

    /// Receive loop, started with the first request
    receiver: Mutex<Option<JoinHandle<()>>>,

    /// Next message ID to hand out
    next_id: AtomicU32,

    identity: Mutex<BindIdentity>,

    /// Whether any request has been written
    traffic: AtomicBool,

    /// Whether the transport has been upgraded
    secured: AtomicBool,

    peer: String,
}

impl Session {
    /// Wrap a transport without marking it established
    ///
    /// Operations fail with `InvalidSessionState` until the session is
    /// created through `establish` or `connect`.
    pub fn new<T: Transport + 'static>(transport: T, config: ClientConfig) -> Self {
        Self::with_state(Box::new(transport), config, SessionState::Idle)
    }

    /// Wrap an already connected transport
    pub fn establish<T: Transport + 'static>(transport: T, config: ClientConfig) -> Self {
        Self::with_state(Box::new(transport), config, SessionState::Connected)
    }

    /// Open a TCP connection to `address` (`host:port`)
    pub fn connect(address: &str, config: ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(address, &config)?;
        let session = Self::establish(transport, config);
        tracing::info!("Session established with {}", session.peer);
        Ok(session)
    }

    fn with_state(transport: Box<dyn Transport>, config: ClientConfig, state: SessionState) -> Self {
        let peer = transport.peer();
        Self {
            config,
            shared: Arc::new(Shared::new(state, transport)),
            receiver: Mutex::new(None),
            next_id: AtomicU32::new(1),
            identity: Mutex::new(BindIdentity::Anonymous),
            traffic: AtomicBool::new(false),
            secured: AtomicBool::new(false),
            peer,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn identity(&self) -> BindIdentity {
        self.identity.lock().clone()
    }

    pub fn is_secured(&self) -> bool {
        self.secured.load(Ordering::SeqCst)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether `id` is still awaiting its final response
    pub fn is_pending(&self, id: MessageId) -> bool {
        self.shared.pending.lock().contains_key(&id)
    }

    /// Number of requests awaiting their final response
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    // =========================================================================
    // Message IDs
    // =========================================================================

    /// Allocate the next message ID
    ///
    /// IDs start at 1 and strictly increase; once the positive 32-bit space
    /// is used up the session cannot issue further requests.
    pub fn next_request_id(&self) -> Result<MessageId> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                if id > MAX_MESSAGE_ID {
                    None
                } else {
                    Some(id + 1)
                }
            })
            .map_err(|_| {
                LdapError::InvalidSessionState("message id space exhausted".to_string())
            })
    }

    // =========================================================================
    // Request Submission
    // =========================================================================

    /// Send a request and register for its responses
    ///
    /// Lower-level than the dispatcher: the caller reads the raw response
    /// messages from the returned handle.
    pub fn submit(
        &self,
        op: ProtocolOp,
        controls: Vec<Control>,
        timeout: Duration,
    ) -> Result<PendingResponse<'_>> {
        self.check_operational()?;

        let id = self.next_request_id()?;
        let rx = self.shared.register(id);
        let pending = PendingResponse {
            session: self,
            id,
            rx,
            deadline: Instant::now() + timeout,
            timeout,
        };

        // On failure `pending` is dropped and the entry removed
        self.send(&LdapMessage::new(id, op).with_controls(controls))?;
        Ok(pending)
    }

    /// Remove a request from the pending table without notifying the server
    pub(crate) fn forget(&self, id: MessageId) -> bool {
        self.shared.forget(id)
    }

    fn check_operational(&self) -> Result<()> {
        match self.state() {
            SessionState::Connected | SessionState::Bound => Ok(()),
            SessionState::Idle => Err(LdapError::InvalidSessionState(
                "session is not connected".to_string(),
            )),
            SessionState::Unbound => {
                self.release_transport();
                let reason = match self.shared.termination_error() {
                    Some(e) => e.to_string(),
                    None => "no reason recorded".to_string(),
                };
                Err(LdapError::InvalidSessionState(format!(
                    "session is unbound: {}",
                    reason
                )))
            }
        }
    }

    /// Drop the transport of a session that ended on the server's side
    fn release_transport(&self) {
        if let Some(transport) = self.shared.transport.lock().take() {
            if let Err(e) = transport.shutdown() {
                tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
            }
        }
    }

    /// Write one frame, starting the receive loop if needed
    fn send(&self, message: &LdapMessage) -> Result<()> {
        let frame = encode_message(message);

        let mut guard = self.shared.transport.lock();
        let transport = match guard.as_mut() {
            Some(transport) => transport,
            None => {
                return Err(LdapError::InvalidSessionState(
                    "transport already released".to_string(),
                ))
            }
        };

        self.ensure_receiver(&**transport)?;
        self.traffic.store(true, Ordering::SeqCst);

        tracing::trace!(
            "Sending {} as message {} to {}",
            message.op.name(),
            message.id,
            self.peer
        );

        if let Err(e) = transport.write_all(&frame).and_then(|_| transport.flush()) {
            drop(guard);
            tracing::warn!("Write to {} failed: {}", self.peer, e);
            self.shared
                .terminate(Termination::TransportLost(e.to_string()));
            return Err(LdapError::Connection(format!(
                "write to {} failed: {}",
                self.peer, e
            )));
        }
        Ok(())
    }

    fn ensure_receiver(&self, transport: &dyn Transport) -> Result<()> {
        let mut receiver = self.receiver.lock();
        if receiver.is_some() {
            return Ok(());
        }

        let reader = transport
            .try_clone_reader()
            .map_err(|e| LdapError::Connection(format!("cannot open read handle: {}", e)))?;
        let handle = ReceiveLoop::new(
            reader,
            Arc::clone(&self.shared),
            self.config.max_message_size,
            self.peer.clone(),
        )
        .spawn()
        .map_err(|e| LdapError::Connection(format!("cannot start receive loop: {}", e)))?;

        *receiver = Some(handle);
        Ok(())
    }

    // =========================================================================
    // Transport Security
    // =========================================================================

    /// Negotiate StartTLS and swap in the secured transport
    ///
    /// Only valid on a connected session that has carried no other traffic.
    /// A refusal from the server leaves the session usable in plaintext; a
    /// failure of the upgrade itself ends the session.
    pub fn upgrade_transport_security(&self, upgrader: &dyn SecurityUpgrade) -> Result<()> {
        self.check_operational()?;
        if self.is_secured() {
            return Err(LdapError::SecurityUpgrade(
                "transport security is already active".to_string(),
            ));
        }

        // Every write happens under this lock, so traffic cannot start
        // between the check and the StartTLS request
        let mut guard = self.shared.transport.lock();
        if self.traffic.load(Ordering::SeqCst) || self.receiver.lock().is_some() {
            return Err(LdapError::SecurityUpgrade(
                "connection has already carried traffic".to_string(),
            ));
        }
        let transport = match guard.as_mut() {
            Some(transport) => transport,
            None => {
                return Err(LdapError::InvalidSessionState(
                    "transport already released".to_string(),
                ))
            }
        };

        let id = self.next_request_id()?;
        self.traffic.store(true, Ordering::SeqCst);
        let request = LdapMessage::new(
            id,
            ProtocolOp::ExtendedRequest {
                name: START_TLS_OID.to_string(),
                value: None,
            },
        );

        tracing::debug!("Requesting StartTLS from {}", self.peer);
        let exchange = write_message(&mut **transport, &request)
            .and_then(|_| self.read_direct(&mut **transport, id));

        let response = match exchange {
            Ok(response) => response,
            Err(e) => {
                drop(guard);
                self.shared
                    .terminate(Termination::TransportLost(format!("StartTLS failed: {}", e)));
                return Err(LdapError::SecurityUpgrade(e.to_string()));
            }
        };

        match response.op {
            ProtocolOp::ExtendedResponse { result, .. } if result.code.is_success() => {}
            ProtocolOp::ExtendedResponse { result, .. } => {
                tracing::warn!("Server {} refused StartTLS: {}", self.peer, result.code);
                return Err(LdapError::SecurityUpgrade(format!(
                    "server refused StartTLS: {} {}",
                    result.code, result.diagnostic
                )));
            }
            other => return Err(LdapError::unexpected("ExtendedResponse", &other)),
        }

        let plain = match guard.take() {
            Some(plain) => plain,
            None => {
                return Err(LdapError::InvalidSessionState(
                    "transport already released".to_string(),
                ))
            }
        };

        match upgrader.upgrade(plain) {
            Ok(secured) => {
                *guard = Some(secured);
                self.secured.store(true, Ordering::SeqCst);
                tracing::info!("Transport security active with {}", self.peer);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.shared.terminate(Termination::TransportLost(format!(
                    "security upgrade failed: {}",
                    e
                )));
                Err(LdapError::SecurityUpgrade(e.to_string()))
            }
        }
    }

    /// Read synchronously until the response to `id` arrives
    ///
    /// Used before the receive loop exists.
    fn read_direct(&self, transport: &mut dyn Transport, id: MessageId) -> Result<LdapMessage> {
        transport.set_read_timeout(Some(self.config.operation_timeout()))?;

        let outcome = loop {
            match read_message(transport, self.config.max_message_size) {
                Ok(message) if message.id == id => break Ok(message),
                Ok(LdapMessage {
                    id: 0,
                    op: ProtocolOp::ExtendedResponse { name, result, .. },
                    ..
                }) if name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) => {
                    break Err(LdapError::Connection(format!(
                        "server sent notice of disconnection: {} {}",
                        result.code, result.diagnostic
                    )))
                }
                Ok(message) => tracing::warn!(
                    "Discarding {} for message {} while awaiting {}",
                    message.op.name(),
                    message.id,
                    id
                ),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = transport.set_read_timeout(None) {
            tracing::debug!("Cannot clear read timeout on {}: {}", self.peer, e);
        }
        outcome
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Simple bind; an empty name with an empty password binds anonymously
    pub fn bind(&self, name: &str, password: &str) -> Result<()> {
        let op = ProtocolOp::BindRequest {
            version: self.config.protocol_version,
            name: name.to_string(),
            auth: BindAuth::Simple(password.as_bytes().to_vec()),
        };
        let pending = self.submit(op, Vec::new(), self.config.operation_timeout())?;
        let response = pending.recv()?;

        match response.op {
            ProtocolOp::BindResponse { result, .. } => self.finish_bind(name, result),
            other => Err(LdapError::unexpected("BindResponse", &other)),
        }
    }

    /// Multi-step SASL bind driven by `mechanism`
    pub fn sasl_bind(&self, mechanism: &mut dyn SaslMechanism) -> Result<()> {
        let mut credentials = mechanism.initial_response()?;

        loop {
            let op = ProtocolOp::BindRequest {
                version: self.config.protocol_version,
                name: String::new(),
                auth: BindAuth::Sasl {
                    mechanism: mechanism.name().to_string(),
                    credentials: credentials.take(),
                },
            };
            let pending = self.submit(op, Vec::new(), self.config.operation_timeout())?;
            let response = pending.recv()?;

            let (result, server_credentials) = match response.op {
                ProtocolOp::BindResponse {
                    result,
                    sasl_credentials,
                } => (result, sasl_credentials),
                other => return Err(LdapError::unexpected("BindResponse", &other)),
            };

            if result.code == ResultCode::SaslBindInProgress {
                tracing::debug!("SASL {} exchange continues", mechanism.name());
                credentials = mechanism.step(server_credentials.as_deref().unwrap_or_default())?;
                continue;
            }

            if result.code.is_success() {
                if let Some(last) = server_credentials {
                    mechanism.step(&last)?;
                }
            }
            return self.finish_bind(&mechanism.identity(), result);
        }
    }

    fn finish_bind(&self, name: &str, result: LdapResult) -> Result<()> {
        if result.code.is_success() {
            let (identity, state) = if name.is_empty() {
                (BindIdentity::Anonymous, SessionState::Connected)
            } else {
                (BindIdentity::Bound(name.to_string()), SessionState::Bound)
            };
            *self.identity.lock() = identity;
            self.shared.set_state(state);
            tracing::debug!("Bound to {} as {:?}", self.peer, name);
            Ok(())
        } else {
            *self.identity.lock() = BindIdentity::Anonymous;
            self.shared.set_state(SessionState::Connected);
            tracing::debug!("Bind as {:?} rejected: {}", name, result.code);
            Err(LdapError::Authentication {
                code: result.code,
                diagnostic: result.diagnostic,
            })
        }
    }

    // =========================================================================
    // Abandon / Close
    // =========================================================================

    /// Ask the server to drop request `id`; no response is expected
    ///
    /// The local waiter, if any, is woken with `Abandoned`.
    pub fn abandon(&self, id: MessageId) -> Result<()> {
        self.check_operational()?;
        self.forget(id);

        let abandon_id = self.next_request_id()?;
        tracing::debug!("Abandoning message {} on {}", id, self.peer);
        self.send(&LdapMessage::new(abandon_id, ProtocolOp::AbandonRequest(id)))
    }

    /// End the session and release the transport
    ///
    /// Idempotent. Outstanding requests fail; an unbind notice is sent when
    /// the connection is still live.
    pub fn close(&self) -> Result<()> {
        let mut transport = match self.shared.transport.lock().take() {
            Some(transport) => transport,
            None => return Ok(()),
        };

        if matches!(self.state(), SessionState::Connected | SessionState::Bound) {
            if let Ok(id) = self.next_request_id() {
                let unbind = encode_message(&LdapMessage::new(id, ProtocolOp::UnbindRequest));
                if let Err(e) = transport.write_all(&unbind).and_then(|_| transport.flush()) {
                    tracing::debug!("Unbind notice to {} not delivered: {}", self.peer, e);
                }
            }
        }

        self.shared.terminate(Termination::Closed);
        *self.identity.lock() = BindIdentity::Anonymous;

        if let Err(e) = transport.shutdown() {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }

        // The receive loop exits once the shutdown unblocks its read
        self.receiver.lock().take();

        tracing::info!("Session with {} closed", self.peer);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Error closing session with {}: {}", self.peer, e);
        }
    }
}
