//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Framing
//! Every message is one tag-length-value element:
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ 0x30 (1) │ Len (4)  │  id, operation, controls    │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Operations (application tags)
//! - 0x60/0x61: Bind request/response
//! - 0x42: Unbind
//! - 0x63/0x64/0x73/0x65: Search request, entry, reference, done
//! - 0x66/0x67: Modify request/response
//! - 0x68/0x69: Add request/response
//! - 0x4A/0x6B: Delete request/response
//! - 0x6E/0x6F: Compare request/response
//! - 0x50: Abandon
//! - 0x77/0x78: Extended request/response

mod codec;
mod message;
mod result;
pub mod tlv;

pub use codec::{
    decode_message, encode_message, read_frame, read_message, write_message, MAX_MESSAGE_ID,
    MAX_MESSAGE_SIZE,
};
pub use message::{
    BindAuth, Control, LdapMessage, MessageId, ProtocolOp, SearchDone, CANCEL_OID,
    NOTICE_OF_DISCONNECTION_OID, PAGED_RESULTS_OID, START_TLS_OID, WHO_AM_I_OID,
};
pub use result::{LdapResult, ResultCode};
