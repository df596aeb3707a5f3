//! Network Module
//!
//! Sessions, transports and the receive loop.
//!
//! ## Architecture
//! - Caller threads write requests under the transport lock
//! - One receive loop thread per session reads responses
//! - Responses routed to waiters by message ID

mod connection;
mod session;
mod transport;

pub use session::{BindIdentity, PendingResponse, SaslMechanism, Session, SessionState};
pub use transport::{SecurityUpgrade, TcpTransport, Transport};
