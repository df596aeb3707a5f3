//! Protocol message definitions
//!
//! Represents every request and response exchanged with the server.

use crate::model::{Dn, Entry, Modification, PageControl, SearchRequest};
use super::LdapResult;

/// Request identifier, unique per session while outstanding
///
/// Valid IDs are `1..=i32::MAX`; 0 is reserved for unsolicited notifications.
pub type MessageId = u32;

/// Paged results control
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// StartTLS extended operation
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// Unsolicited notice of disconnection
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// "Who am I?" extended operation
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// Cancel extended operation
pub const CANCEL_OID: &str = "1.3.6.1.1.8";

/// Request or response extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }
}

/// Bind credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuth {
    /// Shared-secret simple bind
    Simple(Vec<u8>),

    /// One SASL exchange step
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

/// Final message of a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDone {
    pub result: LdapResult,
    pub paging: Option<PageControl>,
}

/// Protocol operation carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest {
        version: u32,
        name: String,
        auth: BindAuth,
    },
    BindResponse {
        result: LdapResult,
        sasl_credentials: Option<Vec<u8>>,
    },
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(Entry),
    SearchResultReference(Vec<String>),
    SearchResultDone(SearchDone),
    ModifyRequest {
        dn: Dn,
        changes: Vec<Modification>,
    },
    ModifyResponse(LdapResult),
    AddRequest(Entry),
    AddResponse(LdapResult),
    DelRequest(Dn),
    DelResponse(LdapResult),
    CompareRequest {
        dn: Dn,
        attr: String,
        value: Vec<u8>,
    },
    CompareResponse(LdapResult),
    AbandonRequest(MessageId),
    ExtendedRequest {
        name: String,
        value: Option<Vec<u8>>,
    },
    ExtendedResponse {
        result: LdapResult,
        name: Option<String>,
        value: Option<Vec<u8>>,
    },
}

impl ProtocolOp {
    /// Operation name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest { .. } => "BindRequest",
            ProtocolOp::BindResponse { .. } => "BindResponse",
            ProtocolOp::UnbindRequest => "UnbindRequest",
            ProtocolOp::SearchRequest(_) => "SearchRequest",
            ProtocolOp::SearchResultEntry(_) => "SearchResultEntry",
            ProtocolOp::SearchResultReference(_) => "SearchResultReference",
            ProtocolOp::SearchResultDone(_) => "SearchResultDone",
            ProtocolOp::ModifyRequest { .. } => "ModifyRequest",
            ProtocolOp::ModifyResponse(_) => "ModifyResponse",
            ProtocolOp::AddRequest(_) => "AddRequest",
            ProtocolOp::AddResponse(_) => "AddResponse",
            ProtocolOp::DelRequest(_) => "DelRequest",
            ProtocolOp::DelResponse(_) => "DelResponse",
            ProtocolOp::CompareRequest { .. } => "CompareRequest",
            ProtocolOp::CompareResponse(_) => "CompareResponse",
            ProtocolOp::AbandonRequest(_) => "AbandonRequest",
            ProtocolOp::ExtendedRequest { .. } => "ExtendedRequest",
            ProtocolOp::ExtendedResponse { .. } => "ExtendedResponse",
        }
    }

    /// Whether this message completes its request
    ///
    /// Search entries and references are followed by more messages
    /// under the same ID; everything else ends the exchange.
    pub fn is_final(&self) -> bool {
        !matches!(
            self,
            ProtocolOp::SearchResultEntry(_) | ProtocolOp::SearchResultReference(_)
        )
    }

    /// Operations only a client sends
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ProtocolOp::BindRequest { .. }
                | ProtocolOp::UnbindRequest
                | ProtocolOp::SearchRequest(_)
                | ProtocolOp::ModifyRequest { .. }
                | ProtocolOp::AddRequest(_)
                | ProtocolOp::DelRequest(_)
                | ProtocolOp::CompareRequest { .. }
                | ProtocolOp::AbandonRequest(_)
                | ProtocolOp::ExtendedRequest { .. }
        )
    }

    /// Result envelope for response operations
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse { result, .. }
            | ProtocolOp::ExtendedResponse { result, .. } => Some(result),
            ProtocolOp::SearchResultDone(done) => Some(&done.result),
            ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DelResponse(result)
            | ProtocolOp::CompareResponse(result) => Some(result),
            _ => None,
        }
    }
}

/// Envelope: ID, operation, controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub id: MessageId,
    pub op: ProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(id: MessageId, op: ProtocolOp) -> Self {
        Self {
            id,
            op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }
}
