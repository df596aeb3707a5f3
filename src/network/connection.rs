//! Receive Loop
//!
//! Reads frames from the server and routes each to the waiter registered
//! under its message ID.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::LdapError;
use crate::protocol::{read_message, LdapMessage, ProtocolOp, NOTICE_OF_DISCONNECTION_OID};
use super::session::{Shared, Termination};

/// How long the loop waits for a writer before leaving the transport
/// release to the session
const RELEASE_WAIT: Duration = Duration::from_millis(100);

/// Owns the read side of a session's transport
pub(crate) struct ReceiveLoop {
    /// Read handle (independent from the session's write handle)
    reader: Box<dyn Read + Send>,

    /// Pending table and lifecycle shared with the session
    shared: Arc<Shared>,

    /// Largest frame accepted
    max_message_size: u32,

    /// Peer address for logging
    peer: String,
}

impl ReceiveLoop {
    pub(crate) fn new(
        reader: Box<dyn Read + Send>,
        shared: Arc<Shared>,
        max_message_size: u32,
        peer: String,
    ) -> Self {
        Self {
            reader,
            shared,
            max_message_size,
            peer,
        }
    }

    /// Run the loop on its own thread
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("dirclient-recv".to_string())
            .spawn(move || self.run())
    }

    /// Read and route messages until the connection ends
    ///
    /// Any exit terminates the session, which wakes every waiter, and then
    /// shuts the transport down.
    fn run(mut self) {
        tracing::debug!("Receive loop started for {}", self.peer);
        self.pump();
        self.shared.release_transport_within(&self.peer, RELEASE_WAIT);
        tracing::debug!("Receive loop stopped for {}", self.peer);
    }

    fn pump(&mut self) {
        loop {
            let message = match read_message(&mut self.reader, self.max_message_size) {
                Ok(message) => message,
                Err(LdapError::Io(ref e))
                    if matches!(
                        e.kind(),
                        ErrorKind::UnexpectedEof
                            | ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::BrokenPipe
                    ) =>
                {
                    tracing::debug!("Connection to {} ended: {}", self.peer, e);
                    self.shared.terminate(Termination::TransportLost(format!(
                        "connection to {} closed",
                        self.peer
                    )));
                    return;
                }
                Err(LdapError::Io(e)) => {
                    if !self.shared.is_terminated() {
                        tracing::warn!("Error reading from {}: {}", self.peer, e);
                    }
                    self.shared
                        .terminate(Termination::TransportLost(e.to_string()));
                    return;
                }
                Err(LdapError::TruncatedMessage(reason)) => {
                    tracing::error!("Truncated message from {}: {}", self.peer, reason);
                    self.shared.terminate(Termination::Truncated(reason));
                    return;
                }
                Err(e) => {
                    tracing::error!("Undecodable message from {}: {}", self.peer, e);
                    self.shared.terminate(Termination::Malformed(e.to_string()));
                    return;
                }
            };

            tracing::trace!(
                "Received {} for message {} from {}",
                message.op.name(),
                message.id,
                self.peer
            );

            if message.op.is_request() {
                tracing::error!(
                    "Server {} sent client-only operation {}",
                    self.peer,
                    message.op.name()
                );
                self.shared.terminate(Termination::Malformed(format!(
                    "server sent {}",
                    message.op.name()
                )));
                return;
            }

            if !self.route(message) {
                return;
            }
        }
    }

    /// Hand a message to its waiter; returns false when the loop must stop
    fn route(&self, message: LdapMessage) -> bool {
        if message.id == 0 {
            return self.unsolicited(message);
        }

        let id = message.id;
        let name = message.op.name();
        if !self.shared.deliver(message) {
            tracing::warn!(
                "Discarding {} for unknown message id {} from {}",
                name,
                id,
                self.peer
            );
        }
        true
    }

    fn unsolicited(&self, message: LdapMessage) -> bool {
        match message.op {
            ProtocolOp::ExtendedResponse { result, name, .. }
                if name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) =>
            {
                tracing::warn!(
                    "Server {} sent notice of disconnection: {} {}",
                    self.peer,
                    result.code,
                    result.diagnostic
                );
                self.shared.terminate(Termination::Disconnected(format!(
                    "{} {}",
                    result.code, result.diagnostic
                )));
                false
            }
            other => {
                tracing::warn!(
                    "Ignoring unsolicited {} from {}",
                    other.name(),
                    self.peer
                );
                true
            }
        }
    }
}
