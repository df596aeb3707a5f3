//! Operation Dispatcher
//!
//! Turns directory operations into request messages on a session and
//! interprets the responses.
//!
//! Each call allocates a message ID, writes the request and blocks until
//! the final response for that ID arrives or the timeout elapses. Calls from
//! different threads on the same session are pipelined.
//!
//! | Operation | Response          | Success                          |
//! |-----------|-------------------|----------------------------------|
//! | add       | AddResponse       | success                          |
//! | modify    | ModifyResponse    | success                          |
//! | delete    | DelResponse       | success                          |
//! | compare   | CompareResponse   | compareTrue / compareFalse       |
//! | search    | entries... + Done | success, size/time limit reached |
//! | extended  | ExtendedResponse  | success                          |

use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::{LdapError, Result};
use crate::model::{Attributes, Dn, Entry, Modification, SearchRequest, SearchResult};
use crate::network::Session;
use crate::protocol::tlv::{TlvWriter, TAG_INTEGER, TAG_SEQUENCE};
use crate::protocol::{
    Control, LdapMessage, LdapResult, MessageId, ProtocolOp, ResultCode, CANCEL_OID,
    WHO_AM_I_OID,
};

/// Response to an extended operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResult {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

/// Issues operations on a session with a per-request timeout
#[derive(Debug, Clone)]
pub struct Dispatcher {
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.operation_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // =========================================================================
    // Update Operations
    // =========================================================================

    /// Create an entry
    pub fn add(&self, session: &Session, dn: &Dn, attributes: &Attributes) -> Result<()> {
        let entry = Entry::new(dn.clone(), attributes.clone());
        let response = self.exchange(session, ProtocolOp::AddRequest(entry), Vec::new())?;
        match response.op {
            ProtocolOp::AddResponse(result) => check(result).map(|_| ()),
            other => Err(LdapError::unexpected("AddResponse", &other)),
        }
    }

    /// Apply all changes to one entry as a single request
    ///
    /// The server applies the whole list or none of it.
    pub fn modify(&self, session: &Session, dn: &Dn, changes: &[Modification]) -> Result<()> {
        let op = ProtocolOp::ModifyRequest {
            dn: dn.clone(),
            changes: changes.to_vec(),
        };
        let response = self.exchange(session, op, Vec::new())?;
        match response.op {
            ProtocolOp::ModifyResponse(result) => check(result).map(|_| ()),
            other => Err(LdapError::unexpected("ModifyResponse", &other)),
        }
    }

    /// Remove a leaf entry
    pub fn delete(&self, session: &Session, dn: &Dn) -> Result<()> {
        let response = self.exchange(session, ProtocolOp::DelRequest(dn.clone()), Vec::new())?;
        match response.op {
            ProtocolOp::DelResponse(result) => check(result).map(|_| ()),
            other => Err(LdapError::unexpected("DelResponse", &other)),
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Test whether an entry holds `attr=value`
    ///
    /// Returns the server's verdict; any other result code is an error.
    pub fn compare(&self, session: &Session, dn: &Dn, attr: &str, value: &[u8]) -> Result<bool> {
        let op = ProtocolOp::CompareRequest {
            dn: dn.clone(),
            attr: attr.to_string(),
            value: value.to_vec(),
        };
        let response = self.exchange(session, op, Vec::new())?;
        match response.op {
            ProtocolOp::CompareResponse(result) => match result.code {
                ResultCode::CompareTrue => Ok(true),
                ResultCode::CompareFalse => Ok(false),
                _ => Err(operation_error(result)),
            },
            other => Err(LdapError::unexpected("CompareResponse", &other)),
        }
    }

    /// Run a search and collect everything it returns
    pub fn search(&self, session: &Session, request: &SearchRequest) -> Result<SearchResult> {
        self.search_with_controls(session, request, Vec::new())
    }

    /// Run a search with additional request controls
    ///
    /// Entries and references are gathered until the final response. A
    /// search stopped by a size or time limit still returns what it found.
    pub fn search_with_controls(
        &self,
        session: &Session,
        request: &SearchRequest,
        controls: Vec<Control>,
    ) -> Result<SearchResult> {
        let pending = session.submit(
            ProtocolOp::SearchRequest(request.clone()),
            controls,
            self.timeout,
        )?;

        let mut entries = Vec::new();
        let mut referrals = Vec::new();
        loop {
            let message = pending.recv()?;
            match message.op {
                ProtocolOp::SearchResultEntry(entry) => entries.push(entry),
                ProtocolOp::SearchResultReference(urls) => referrals.extend(urls),
                ProtocolOp::SearchResultDone(done) => {
                    match done.result.code {
                        ResultCode::Success => {}
                        ResultCode::SizeLimitExceeded | ResultCode::TimeLimitExceeded => {
                            tracing::debug!(
                                "Search {} stopped early ({}), {} entries returned",
                                pending.id(),
                                done.result.code,
                                entries.len()
                            );
                        }
                        _ => return Err(operation_error(done.result)),
                    }

                    return Ok(SearchResult {
                        entries,
                        referrals,
                        result: done.result,
                        cookie: done.paging.map(|p| p.cookie).unwrap_or_default(),
                    });
                }
                other => return Err(LdapError::unexpected("SearchResultDone", &other)),
            }
        }
    }

    // =========================================================================
    // Extended Operations
    // =========================================================================

    /// Issue an extended operation by OID
    pub fn extended(
        &self,
        session: &Session,
        name: &str,
        value: Option<Vec<u8>>,
    ) -> Result<ExtendedResult> {
        let op = ProtocolOp::ExtendedRequest {
            name: name.to_string(),
            value,
        };
        let response = self.exchange(session, op, Vec::new())?;
        match response.op {
            ProtocolOp::ExtendedResponse {
                result,
                name,
                value,
            } => Ok(ExtendedResult {
                result: check(result)?,
                name,
                value,
            }),
            other => Err(LdapError::unexpected("ExtendedResponse", &other)),
        }
    }

    /// Authorization identity the server associates with the session
    ///
    /// Empty for an anonymous session.
    pub fn who_am_i(&self, session: &Session) -> Result<String> {
        let response = self.extended(session, WHO_AM_I_OID, None)?;
        match response.value {
            Some(value) => String::from_utf8(value).map_err(|_| {
                LdapError::MalformedMessage("authorization identity is not UTF-8".to_string())
            }),
            None => Ok(String::new()),
        }
    }

    /// Ask the server to cancel an outstanding request and confirm it did
    ///
    /// Unlike abandon, the server answers both requests: the canceled one
    /// completes with `canceled`, which its waiter sees as an `Operation`
    /// error.
    pub fn cancel(&self, session: &Session, id: MessageId) -> Result<()> {
        let mut value = TlvWriter::with_capacity(16);
        value.put_constructed(TAG_SEQUENCE, |w| w.put_u32(TAG_INTEGER, id));

        let op = ProtocolOp::ExtendedRequest {
            name: CANCEL_OID.to_string(),
            value: Some(value.into_bytes().to_vec()),
        };
        let response = self.exchange(session, op, Vec::new())?;

        match response.op {
            ProtocolOp::ExtendedResponse { result, .. } => match result.code {
                ResultCode::Canceled | ResultCode::Success => {
                    tracing::debug!("Message {} canceled", id);
                    Ok(())
                }
                _ => Err(operation_error(result)),
            },
            other => Err(LdapError::unexpected("ExtendedResponse", &other)),
        }
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Send one request and wait for its single response
    fn exchange(
        &self,
        session: &Session,
        op: ProtocolOp,
        controls: Vec<Control>,
    ) -> Result<LdapMessage> {
        let pending = session.submit(op, controls, self.timeout)?;
        pending.recv()
    }
}

fn check(result: LdapResult) -> Result<LdapResult> {
    if result.code.is_success() {
        Ok(result)
    } else {
        Err(operation_error(result))
    }
}

fn operation_error(result: LdapResult) -> LdapError {
    LdapError::Operation {
        code: result.code,
        diagnostic: result.diagnostic,
        matched_dn: result.matched_dn,
    }
}
