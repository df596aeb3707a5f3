//! Error types for dirclient
//!
//! Provides a unified error type for all client operations.

use thiserror::Error;

use crate::protocol::{ProtocolOp, ResultCode};

/// Result type alias using LdapError
pub type Result<T> = std::result::Result<T, LdapError>;

/// Unified error type for dirclient operations
#[derive(Debug, Error)]
pub enum LdapError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Security upgrade failed: {0}")]
    SecurityUpgrade(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Truncated message: {0}")]
    TruncatedMessage(String),

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    #[error("Authentication failed ({code}): {diagnostic}")]
    Authentication { code: ResultCode, diagnostic: String },

    #[error("Operation timed out after {0} ms")]
    OperationTimeout(u64),

    #[error("Request {0} was abandoned")]
    Abandoned(u32),

    // -------------------------------------------------------------------------
    // Operation Errors
    // -------------------------------------------------------------------------
    #[error("Operation failed ({code}): {diagnostic}")]
    Operation {
        code: ResultCode,
        diagnostic: String,
        matched_dn: String,
    },

    #[error("Unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Paged search cursor is exhausted")]
    CursorExhausted,

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl LdapError {
    /// Whether this error leaves the session unusable
    ///
    /// Transport and framing failures terminate the session; everything else
    /// is reported to the caller with the session left as it was.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            LdapError::Io(_)
                | LdapError::Connection(_)
                | LdapError::MalformedMessage(_)
                | LdapError::TruncatedMessage(_)
        )
    }

    /// The server result code carried by this error, if any
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            LdapError::Authentication { code, .. } | LdapError::Operation { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Response of the wrong kind for the request that was sent
    pub(crate) fn unexpected(expected: &'static str, got: &ProtocolOp) -> Self {
        LdapError::UnexpectedResponse {
            expected,
            got: got.name(),
        }
    }
}
