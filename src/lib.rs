//! # dirclient
//!
//! Client core for a directory access protocol:
//! - Tag-length-value message codec with deterministic encoding
//! - Sessions with pipelined requests correlated by message ID
//! - Add, modify, delete, compare, search and extended operations
//! - Paged search cursors over large result sets
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Client Facade                          │
//! │              (argument validation, string DNs)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Dispatcher  │◀─────────│ PagedCursor │
//!   │ (per-op)    │          │  (cookies)  │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐  frames  ┌─────────────┐
//!   │   Session   │─────────▶│  Transport  │
//!   │  (pending)  │◀─────────│  (TCP/TLS)  │
//!   └─────────────┘ receive  └─────────────┘
//!                    loop
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod model;
pub mod protocol;
pub mod network;
pub mod dispatcher;
pub mod paging;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LdapError, Result};
pub use config::ClientConfig;
pub use client::Client;
pub use dispatcher::{Dispatcher, ExtendedResult};
pub use model::{
    Attribute, Attributes, Dn, Entry, Filter, Modification, SearchRequest, SearchResult,
    SearchScope,
};
pub use network::{Session, SessionState};
pub use paging::{CursorState, PagedCursor, PagedEntries};
pub use protocol::{LdapResult, ResultCode};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of dirclient
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
