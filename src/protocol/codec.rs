//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Message Format
//! ```text
//! 0x30 LDAPMessage
//! ├── 0x02 message id (4)
//! ├── 0x4_/0x6_/0x7_ protocol operation
//! └── 0xA0 controls (optional)
//!     └── 0x30 control { 0x04 oid, 0x01 critical, 0x04 value? }
//! ```
//!
//! The outer LDAPMessage element is the frame: a reader takes its 5-byte
//! header, checks the tag and size, then reads exactly `len` more bytes.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::{LdapError, Result};
use crate::model::{
    Attribute, Attributes, DerefAliases, Dn, Entry, Filter, Modification, PageControl,
    SearchRequest, SearchScope, MAX_FILTER_DEPTH,
};
use super::tlv::{
    self, TlvReader, TlvWriter, HEADER_SIZE, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_SEQUENCE, TAG_SET,
};
use super::{
    BindAuth, Control, LdapMessage, LdapResult, MessageId, ProtocolOp, SearchDone,
    PAGED_RESULTS_OID,
};

/// Maximum frame size (16 MB)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

// Application tags
const TAG_BIND_REQUEST: u8 = 0x60;
const TAG_BIND_RESPONSE: u8 = 0x61;
const TAG_UNBIND_REQUEST: u8 = 0x42;
const TAG_SEARCH_REQUEST: u8 = 0x63;
const TAG_SEARCH_RESULT_ENTRY: u8 = 0x64;
const TAG_SEARCH_RESULT_DONE: u8 = 0x65;
const TAG_MODIFY_REQUEST: u8 = 0x66;
const TAG_MODIFY_RESPONSE: u8 = 0x67;
const TAG_ADD_REQUEST: u8 = 0x68;
const TAG_ADD_RESPONSE: u8 = 0x69;
const TAG_DEL_REQUEST: u8 = 0x4A;
const TAG_DEL_RESPONSE: u8 = 0x6B;
const TAG_COMPARE_REQUEST: u8 = 0x6E;
const TAG_COMPARE_RESPONSE: u8 = 0x6F;
const TAG_ABANDON_REQUEST: u8 = 0x50;
const TAG_SEARCH_RESULT_REFERENCE: u8 = 0x73;
const TAG_EXTENDED_REQUEST: u8 = 0x77;
const TAG_EXTENDED_RESPONSE: u8 = 0x78;

// Context tags
const TAG_CONTROLS: u8 = 0xA0;
const TAG_AUTH_SIMPLE: u8 = 0x80;
const TAG_AUTH_SASL: u8 = 0xA3;
const TAG_REFERRAL: u8 = 0xA3;
const TAG_SASL_CREDENTIALS: u8 = 0x87;
const TAG_EXTENDED_REQUEST_NAME: u8 = 0x80;
const TAG_EXTENDED_REQUEST_VALUE: u8 = 0x81;
const TAG_EXTENDED_RESPONSE_NAME: u8 = 0x8A;
const TAG_EXTENDED_RESPONSE_VALUE: u8 = 0x8B;

// Filter tags
const TAG_FILTER_AND: u8 = 0xA0;
const TAG_FILTER_OR: u8 = 0xA1;
const TAG_FILTER_NOT: u8 = 0xA2;
const TAG_FILTER_EQUALITY: u8 = 0xA3;
const TAG_FILTER_SUBSTRINGS: u8 = 0xA4;
const TAG_FILTER_GREATER_OR_EQUAL: u8 = 0xA5;
const TAG_FILTER_LESS_OR_EQUAL: u8 = 0xA6;
const TAG_FILTER_PRESENT: u8 = 0x87;
const TAG_FILTER_APPROX: u8 = 0xA8;
const TAG_SUBSTRING_INITIAL: u8 = 0x80;
const TAG_SUBSTRING_ANY: u8 = 0x81;
const TAG_SUBSTRING_FINAL: u8 = 0x82;

/// Largest message ID representable on the wire
pub const MAX_MESSAGE_ID: MessageId = i32::MAX as MessageId;

// =============================================================================
// Message Encoding
// =============================================================================

/// Encode a message to bytes (one complete frame)
///
/// On search operations the `paging` field is the only carrier of the paged
/// results control: a raw control with that OID in `controls` is not sent.
pub fn encode_message(message: &LdapMessage) -> Bytes {
    let mut controls = Vec::with_capacity(message.controls.len() + 1);
    let carries_paging = match paging_slot_of(&message.op) {
        Some(paging) => {
            if let Some(paging) = paging {
                controls.push(encode_paging_control(paging));
            }
            true
        }
        None => false,
    };
    controls.extend(
        message
            .controls
            .iter()
            .filter(|c| !(carries_paging && c.oid == PAGED_RESULTS_OID))
            .cloned(),
    );

    let mut writer = TlvWriter::new();
    writer.put_constructed(TAG_SEQUENCE, |w| {
        w.put_u32(TAG_INTEGER, message.id);
        encode_op(w, &message.op);
        if !controls.is_empty() {
            w.put_constructed(TAG_CONTROLS, |w| {
                for control in &controls {
                    encode_control(w, control);
                }
            });
        }
    });
    writer.into_bytes()
}

/// Paging field of a search operation; `None` for every other operation
fn paging_slot_of(op: &ProtocolOp) -> Option<Option<&PageControl>> {
    match op {
        ProtocolOp::SearchRequest(request) => Some(request.paging.as_ref()),
        ProtocolOp::SearchResultDone(done) => Some(done.paging.as_ref()),
        _ => None,
    }
}

fn encode_op(w: &mut TlvWriter, op: &ProtocolOp) {
    match op {
        ProtocolOp::BindRequest {
            version,
            name,
            auth,
        } => w.put_constructed(TAG_BIND_REQUEST, |w| {
            w.put_u32(TAG_INTEGER, *version);
            w.put_string(name);
            match auth {
                BindAuth::Simple(password) => w.put_primitive(TAG_AUTH_SIMPLE, password),
                BindAuth::Sasl {
                    mechanism,
                    credentials,
                } => w.put_constructed(TAG_AUTH_SASL, |w| {
                    w.put_string(mechanism);
                    if let Some(credentials) = credentials {
                        w.put_octets(credentials);
                    }
                }),
            }
        }),
        ProtocolOp::BindResponse {
            result,
            sasl_credentials,
        } => w.put_constructed(TAG_BIND_RESPONSE, |w| {
            encode_result(w, result);
            if let Some(credentials) = sasl_credentials {
                w.put_primitive(TAG_SASL_CREDENTIALS, credentials);
            }
        }),
        ProtocolOp::UnbindRequest => w.put_primitive(TAG_UNBIND_REQUEST, &[]),
        ProtocolOp::SearchRequest(request) => w.put_constructed(TAG_SEARCH_REQUEST, |w| {
            w.put_string(&request.base.to_string());
            w.put_u32(TAG_ENUMERATED, request.scope as u32);
            w.put_u32(TAG_ENUMERATED, request.deref_aliases as u32);
            w.put_u32(TAG_INTEGER, request.size_limit);
            w.put_u32(TAG_INTEGER, request.time_limit);
            w.put_bool(request.types_only);
            encode_filter(w, &request.filter);
            w.put_constructed(TAG_SEQUENCE, |w| {
                for attr in &request.attributes {
                    w.put_string(attr);
                }
            });
        }),
        ProtocolOp::SearchResultEntry(entry) => w.put_constructed(TAG_SEARCH_RESULT_ENTRY, |w| {
            w.put_string(&entry.dn.to_string());
            encode_attribute_list(w, &entry.attributes);
        }),
        ProtocolOp::SearchResultReference(urls) => {
            w.put_constructed(TAG_SEARCH_RESULT_REFERENCE, |w| {
                for url in urls {
                    w.put_string(url);
                }
            })
        }
        ProtocolOp::SearchResultDone(done) => {
            w.put_constructed(TAG_SEARCH_RESULT_DONE, |w| encode_result(w, &done.result))
        }
        ProtocolOp::ModifyRequest { dn, changes } => w.put_constructed(TAG_MODIFY_REQUEST, |w| {
            w.put_string(&dn.to_string());
            w.put_constructed(TAG_SEQUENCE, |w| {
                for change in changes {
                    w.put_constructed(TAG_SEQUENCE, |w| {
                        w.put_u32(TAG_ENUMERATED, change.code());
                        encode_attribute(w, change.attribute());
                    });
                }
            });
        }),
        ProtocolOp::ModifyResponse(result) => {
            w.put_constructed(TAG_MODIFY_RESPONSE, |w| encode_result(w, result))
        }
        ProtocolOp::AddRequest(entry) => w.put_constructed(TAG_ADD_REQUEST, |w| {
            w.put_string(&entry.dn.to_string());
            encode_attribute_list(w, &entry.attributes);
        }),
        ProtocolOp::AddResponse(result) => {
            w.put_constructed(TAG_ADD_RESPONSE, |w| encode_result(w, result))
        }
        ProtocolOp::DelRequest(dn) => w.put_primitive(TAG_DEL_REQUEST, dn.to_string().as_bytes()),
        ProtocolOp::DelResponse(result) => {
            w.put_constructed(TAG_DEL_RESPONSE, |w| encode_result(w, result))
        }
        ProtocolOp::CompareRequest { dn, attr, value } => {
            w.put_constructed(TAG_COMPARE_REQUEST, |w| {
                w.put_string(&dn.to_string());
                w.put_constructed(TAG_SEQUENCE, |w| {
                    w.put_string(attr);
                    w.put_octets(value);
                });
            })
        }
        ProtocolOp::CompareResponse(result) => {
            w.put_constructed(TAG_COMPARE_RESPONSE, |w| encode_result(w, result))
        }
        ProtocolOp::AbandonRequest(id) => w.put_primitive(TAG_ABANDON_REQUEST, &id.to_be_bytes()),
        ProtocolOp::ExtendedRequest { name, value } => {
            w.put_constructed(TAG_EXTENDED_REQUEST, |w| {
                w.put_primitive(TAG_EXTENDED_REQUEST_NAME, name.as_bytes());
                if let Some(value) = value {
                    w.put_primitive(TAG_EXTENDED_REQUEST_VALUE, value);
                }
            })
        }
        ProtocolOp::ExtendedResponse {
            result,
            name,
            value,
        } => w.put_constructed(TAG_EXTENDED_RESPONSE, |w| {
            encode_result(w, result);
            if let Some(name) = name {
                w.put_primitive(TAG_EXTENDED_RESPONSE_NAME, name.as_bytes());
            }
            if let Some(value) = value {
                w.put_primitive(TAG_EXTENDED_RESPONSE_VALUE, value);
            }
        }),
    }
}

fn encode_result(w: &mut TlvWriter, result: &LdapResult) {
    w.put_u32(TAG_ENUMERATED, result.code.code());
    w.put_string(&result.matched_dn);
    w.put_string(&result.diagnostic);
    if !result.referrals.is_empty() {
        w.put_constructed(TAG_REFERRAL, |w| {
            for url in &result.referrals {
                w.put_string(url);
            }
        });
    }
}

fn encode_attribute(w: &mut TlvWriter, attribute: &Attribute) {
    w.put_constructed(TAG_SEQUENCE, |w| {
        w.put_string(attribute.name());
        w.put_constructed(TAG_SET, |w| {
            for value in attribute.values() {
                w.put_octets(value);
            }
        });
    });
}

fn encode_attribute_list(w: &mut TlvWriter, attributes: &Attributes) {
    w.put_constructed(TAG_SEQUENCE, |w| {
        for attribute in attributes.iter() {
            encode_attribute(w, attribute);
        }
    });
}

fn encode_filter(w: &mut TlvWriter, filter: &Filter) {
    let assertion = |w: &mut TlvWriter, tag: u8, attr: &str, value: &[u8]| {
        w.put_constructed(tag, |w| {
            w.put_string(attr);
            w.put_octets(value);
        });
    };

    match filter {
        Filter::And(filters) => w.put_constructed(TAG_FILTER_AND, |w| {
            filters.iter().for_each(|f| encode_filter(w, f))
        }),
        Filter::Or(filters) => w.put_constructed(TAG_FILTER_OR, |w| {
            filters.iter().for_each(|f| encode_filter(w, f))
        }),
        Filter::Not(inner) => w.put_constructed(TAG_FILTER_NOT, |w| encode_filter(w, inner)),
        Filter::Equality { attr, value } => assertion(w, TAG_FILTER_EQUALITY, attr, value),
        Filter::GreaterOrEqual { attr, value } => {
            assertion(w, TAG_FILTER_GREATER_OR_EQUAL, attr, value)
        }
        Filter::LessOrEqual { attr, value } => assertion(w, TAG_FILTER_LESS_OR_EQUAL, attr, value),
        Filter::Approx { attr, value } => assertion(w, TAG_FILTER_APPROX, attr, value),
        Filter::Present(attr) => w.put_primitive(TAG_FILTER_PRESENT, attr.as_bytes()),
        Filter::Substring {
            attr,
            initial,
            any,
            final_value,
        } => w.put_constructed(TAG_FILTER_SUBSTRINGS, |w| {
            w.put_string(attr);
            w.put_constructed(TAG_SEQUENCE, |w| {
                if let Some(initial) = initial {
                    w.put_primitive(TAG_SUBSTRING_INITIAL, initial);
                }
                for part in any {
                    w.put_primitive(TAG_SUBSTRING_ANY, part);
                }
                if let Some(final_value) = final_value {
                    w.put_primitive(TAG_SUBSTRING_FINAL, final_value);
                }
            });
        }),
    }
}

fn encode_control(w: &mut TlvWriter, control: &Control) {
    w.put_constructed(TAG_SEQUENCE, |w| {
        w.put_string(&control.oid);
        w.put_bool(control.critical);
        if let Some(value) = &control.value {
            w.put_octets(value);
        }
    });
}

fn encode_paging_control(paging: &PageControl) -> Control {
    let mut value = TlvWriter::with_capacity(HEADER_SIZE * 3 + 4 + paging.cookie.len());
    value.put_constructed(TAG_SEQUENCE, |w| {
        w.put_u32(TAG_INTEGER, paging.size);
        w.put_octets(&paging.cookie);
    });
    Control::new(
        PAGED_RESULTS_OID,
        paging.critical,
        Some(value.into_bytes().to_vec()),
    )
}

// =============================================================================
// Message Decoding
// =============================================================================

/// Decode one complete frame
pub fn decode_message(bytes: &[u8]) -> Result<LdapMessage> {
    let mut outer = TlvReader::new(bytes);
    let mut reader = outer.read_constructed(TAG_SEQUENCE)?;
    outer.finish()?;

    let id = reader.read_u32(TAG_INTEGER)?;
    if id > MAX_MESSAGE_ID {
        return Err(LdapError::MalformedMessage(format!(
            "Message id out of range: {}",
            id
        )));
    }

    let mut op = decode_op(&mut reader)?;

    let mut controls = match reader.read_optional(TAG_CONTROLS)? {
        Some(value) => decode_controls(value)?,
        None => Vec::new(),
    };
    reader.finish()?;

    // Lift the paging control back into the search operation
    let paging_slot = match &mut op {
        ProtocolOp::SearchRequest(request) => Some(&mut request.paging),
        ProtocolOp::SearchResultDone(done) => Some(&mut done.paging),
        _ => None,
    };
    if let Some(slot) = paging_slot {
        let mut positions = controls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.oid == PAGED_RESULTS_OID)
            .map(|(pos, _)| pos);
        match (positions.next(), positions.next()) {
            (Some(pos), None) => {
                let control = controls.remove(pos);
                *slot = Some(decode_paging_control(&control)?);
            }
            (Some(_), Some(_)) => {
                return Err(LdapError::MalformedMessage(
                    "Paged results control appears more than once".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok(LdapMessage { id, op, controls })
}

fn decode_op(reader: &mut TlvReader<'_>) -> Result<ProtocolOp> {
    let (tag, value) = reader.read_any()?;
    let mut body = TlvReader::new(value);

    let op = match tag {
        TAG_BIND_REQUEST => {
            let version = body.read_u32(TAG_INTEGER)?;
            let name = body.read_string(TAG_OCTET_STRING)?;
            let auth = match body.read_any()? {
                (TAG_AUTH_SIMPLE, password) => BindAuth::Simple(password.to_vec()),
                (TAG_AUTH_SASL, sasl) => {
                    let mut sasl = TlvReader::new(sasl);
                    let mechanism = sasl.read_string(TAG_OCTET_STRING)?;
                    let credentials = sasl
                        .read_optional(TAG_OCTET_STRING)?
                        .map(<[u8]>::to_vec);
                    sasl.finish()?;
                    BindAuth::Sasl {
                        mechanism,
                        credentials,
                    }
                }
                (other, _) => return Err(unknown_tag("bind authentication", other)),
            };
            ProtocolOp::BindRequest {
                version,
                name,
                auth,
            }
        }
        TAG_BIND_RESPONSE => ProtocolOp::BindResponse {
            result: decode_result(&mut body)?,
            sasl_credentials: body
                .read_optional(TAG_SASL_CREDENTIALS)?
                .map(<[u8]>::to_vec),
        },
        TAG_UNBIND_REQUEST => {
            if !value.is_empty() {
                return Err(LdapError::MalformedMessage(format!(
                    "UnbindRequest: unexpected payload of {} bytes",
                    value.len()
                )));
            }
            ProtocolOp::UnbindRequest
        }
        TAG_SEARCH_REQUEST => ProtocolOp::SearchRequest(decode_search_request(&mut body)?),
        TAG_SEARCH_RESULT_ENTRY => {
            let dn = decode_dn(body.read_element(TAG_OCTET_STRING)?)?;
            let attributes = decode_attribute_list(&mut body)?;
            ProtocolOp::SearchResultEntry(Entry::new(dn, attributes))
        }
        TAG_SEARCH_RESULT_REFERENCE => {
            let mut urls = Vec::new();
            while !body.is_empty() {
                urls.push(body.read_string(TAG_OCTET_STRING)?);
            }
            ProtocolOp::SearchResultReference(urls)
        }
        TAG_SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(SearchDone {
            result: decode_result(&mut body)?,
            paging: None,
        }),
        TAG_MODIFY_REQUEST => {
            let dn = decode_dn(body.read_element(TAG_OCTET_STRING)?)?;
            let mut list = body.read_constructed(TAG_SEQUENCE)?;
            let mut changes = Vec::new();
            while !list.is_empty() {
                let mut change = list.read_constructed(TAG_SEQUENCE)?;
                let code = change.read_u32(TAG_ENUMERATED)?;
                let attribute = decode_attribute(&mut change)?;
                change.finish()?;
                let modification = Modification::from_code(code, attribute).ok_or_else(|| {
                    LdapError::MalformedMessage(format!("Unknown modification type: {}", code))
                })?;
                changes.push(modification);
            }
            ProtocolOp::ModifyRequest { dn, changes }
        }
        TAG_MODIFY_RESPONSE => ProtocolOp::ModifyResponse(decode_result(&mut body)?),
        TAG_ADD_REQUEST => {
            let dn = decode_dn(body.read_element(TAG_OCTET_STRING)?)?;
            let attributes = decode_attribute_list(&mut body)?;
            ProtocolOp::AddRequest(Entry::new(dn, attributes))
        }
        TAG_ADD_RESPONSE => ProtocolOp::AddResponse(decode_result(&mut body)?),
        TAG_DEL_REQUEST => {
            let dn = decode_dn(value)?;
            body = TlvReader::new(&[]);
            ProtocolOp::DelRequest(dn)
        }
        TAG_DEL_RESPONSE => ProtocolOp::DelResponse(decode_result(&mut body)?),
        TAG_COMPARE_REQUEST => {
            let dn = decode_dn(body.read_element(TAG_OCTET_STRING)?)?;
            let mut assertion = body.read_constructed(TAG_SEQUENCE)?;
            let attr = assertion.read_string(TAG_OCTET_STRING)?;
            let value = assertion.read_octets(TAG_OCTET_STRING)?;
            assertion.finish()?;
            ProtocolOp::CompareRequest { dn, attr, value }
        }
        TAG_COMPARE_RESPONSE => ProtocolOp::CompareResponse(decode_result(&mut body)?),
        TAG_ABANDON_REQUEST => {
            let id = tlv::fixed_u32(tag, value)?;
            body = TlvReader::new(&[]);
            ProtocolOp::AbandonRequest(id)
        }
        TAG_EXTENDED_REQUEST => {
            let name = tlv::utf8(body.read_element(TAG_EXTENDED_REQUEST_NAME)?)?;
            let value = body
                .read_optional(TAG_EXTENDED_REQUEST_VALUE)?
                .map(<[u8]>::to_vec);
            ProtocolOp::ExtendedRequest { name, value }
        }
        TAG_EXTENDED_RESPONSE => {
            let result = decode_result(&mut body)?;
            let name = body
                .read_optional(TAG_EXTENDED_RESPONSE_NAME)?
                .map(tlv::utf8)
                .transpose()?;
            let value = body
                .read_optional(TAG_EXTENDED_RESPONSE_VALUE)?
                .map(<[u8]>::to_vec);
            ProtocolOp::ExtendedResponse {
                result,
                name,
                value,
            }
        }
        other => return Err(unknown_tag("protocol operation", other)),
    };

    body.finish()?;
    Ok(op)
}

fn unknown_tag(context: &str, tag: u8) -> LdapError {
    LdapError::MalformedMessage(format!("Unknown {} tag: 0x{:02x}", context, tag))
}

fn decode_dn(value: &[u8]) -> Result<Dn> {
    let text = tlv::utf8(value)?;
    Dn::parse(&text).map_err(|e| LdapError::MalformedMessage(e.to_string()))
}

fn decode_result(reader: &mut TlvReader<'_>) -> Result<LdapResult> {
    let code = reader.read_u32(TAG_ENUMERATED)?.into();
    let matched_dn = reader.read_string(TAG_OCTET_STRING)?;
    let diagnostic = reader.read_string(TAG_OCTET_STRING)?;
    let mut referrals = Vec::new();
    if let Some(value) = reader.read_optional(TAG_REFERRAL)? {
        let mut urls = TlvReader::new(value);
        while !urls.is_empty() {
            referrals.push(urls.read_string(TAG_OCTET_STRING)?);
        }
    }
    Ok(LdapResult {
        code,
        matched_dn,
        diagnostic,
        referrals,
    })
}

fn decode_attribute(reader: &mut TlvReader<'_>) -> Result<Attribute> {
    let mut attribute = reader.read_constructed(TAG_SEQUENCE)?;
    let name = attribute.read_string(TAG_OCTET_STRING)?;
    let mut set = attribute.read_constructed(TAG_SET)?;
    attribute.finish()?;

    let mut values = Vec::new();
    while !set.is_empty() {
        values.push(set.read_octets(TAG_OCTET_STRING)?);
    }
    Ok(Attribute::new(name, values))
}

fn decode_attribute_list(reader: &mut TlvReader<'_>) -> Result<Attributes> {
    let mut list = reader.read_constructed(TAG_SEQUENCE)?;
    let mut attributes = Attributes::new();
    while !list.is_empty() {
        attributes
            .insert(decode_attribute(&mut list)?)
            .map_err(|e| LdapError::MalformedMessage(e.to_string()))?;
    }
    Ok(attributes)
}

fn decode_search_request(body: &mut TlvReader<'_>) -> Result<SearchRequest> {
    let base = decode_dn(body.read_element(TAG_OCTET_STRING)?)?;
    let scope = SearchScope::try_from(body.read_u32(TAG_ENUMERATED)?)?;
    let deref_aliases = DerefAliases::try_from(body.read_u32(TAG_ENUMERATED)?)?;
    let size_limit = body.read_u32(TAG_INTEGER)?;
    let time_limit = body.read_u32(TAG_INTEGER)?;
    let types_only = body.read_bool()?;
    let filter = decode_filter(body, 1)?;

    let mut list = body.read_constructed(TAG_SEQUENCE)?;
    let mut attributes = Vec::new();
    while !list.is_empty() {
        attributes.push(list.read_string(TAG_OCTET_STRING)?);
    }

    Ok(SearchRequest {
        base,
        scope,
        deref_aliases,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
        paging: None,
    })
}

/// Decode one filter element; `depth` counts the enclosing filters plus one
fn decode_filter(reader: &mut TlvReader<'_>, depth: usize) -> Result<Filter> {
    if depth > MAX_FILTER_DEPTH {
        return Err(LdapError::MalformedMessage(format!(
            "Filter nested deeper than {} levels",
            MAX_FILTER_DEPTH
        )));
    }
    let (tag, value) = reader.read_any()?;
    let mut body = TlvReader::new(value);

    let filter = match tag {
        TAG_FILTER_AND | TAG_FILTER_OR => {
            let mut filters = Vec::new();
            while !body.is_empty() {
                filters.push(decode_filter(&mut body, depth + 1)?);
            }
            if tag == TAG_FILTER_AND {
                Filter::And(filters)
            } else {
                Filter::Or(filters)
            }
        }
        TAG_FILTER_NOT => Filter::Not(Box::new(decode_filter(&mut body, depth + 1)?)),
        TAG_FILTER_EQUALITY
        | TAG_FILTER_GREATER_OR_EQUAL
        | TAG_FILTER_LESS_OR_EQUAL
        | TAG_FILTER_APPROX => {
            let attr = body.read_string(TAG_OCTET_STRING)?;
            let value = body.read_octets(TAG_OCTET_STRING)?;
            match tag {
                TAG_FILTER_EQUALITY => Filter::Equality { attr, value },
                TAG_FILTER_GREATER_OR_EQUAL => Filter::GreaterOrEqual { attr, value },
                TAG_FILTER_LESS_OR_EQUAL => Filter::LessOrEqual { attr, value },
                _ => Filter::Approx { attr, value },
            }
        }
        TAG_FILTER_PRESENT => {
            let attr = tlv::utf8(value)?;
            body = TlvReader::new(&[]);
            Filter::Present(attr)
        }
        TAG_FILTER_SUBSTRINGS => {
            let attr = body.read_string(TAG_OCTET_STRING)?;
            let mut parts = body.read_constructed(TAG_SEQUENCE)?;
            let mut initial = None;
            let mut any = Vec::new();
            let mut final_value = None;
            while !parts.is_empty() {
                match parts.read_any()? {
                    (TAG_SUBSTRING_INITIAL, v) if initial.is_none() && any.is_empty() => {
                        initial = Some(v.to_vec())
                    }
                    (TAG_SUBSTRING_ANY, v) if final_value.is_none() => any.push(v.to_vec()),
                    (TAG_SUBSTRING_FINAL, v) if final_value.is_none() => {
                        final_value = Some(v.to_vec())
                    }
                    (other, _) => return Err(unknown_tag("substring component", other)),
                }
            }
            Filter::Substring {
                attr,
                initial,
                any,
                final_value,
            }
        }
        other => return Err(unknown_tag("filter", other)),
    };

    body.finish()?;
    Ok(filter)
}

fn decode_controls(value: &[u8]) -> Result<Vec<Control>> {
    let mut list = TlvReader::new(value);
    let mut controls = Vec::new();
    while !list.is_empty() {
        let mut control = list.read_constructed(TAG_SEQUENCE)?;
        let oid = control.read_string(TAG_OCTET_STRING)?;
        let critical = control.read_bool()?;
        let value = control
            .read_optional(TAG_OCTET_STRING)?
            .map(<[u8]>::to_vec);
        control.finish()?;
        controls.push(Control {
            oid,
            critical,
            value,
        });
    }
    Ok(controls)
}

fn decode_paging_control(control: &Control) -> Result<PageControl> {
    let value = control.value.as_deref().ok_or_else(|| {
        LdapError::MalformedMessage("Paged results control without value".to_string())
    })?;
    let mut outer = TlvReader::new(value);
    let mut body = outer.read_constructed(TAG_SEQUENCE)?;
    outer.finish()?;
    let size = body.read_u32(TAG_INTEGER)?;
    let cookie = body.read_octets(TAG_OCTET_STRING)?;
    body.finish()?;
    Ok(PageControl {
        size,
        cookie,
        critical: control.critical,
    })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete frame from a stream
///
/// Blocks until the whole frame is received or an error occurs
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_size: u32) -> Result<Vec<u8>> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    if header[0] != TAG_SEQUENCE {
        return Err(LdapError::MalformedMessage(format!(
            "Expecting 0x30 as first byte of a message, got 0x{:02x}",
            header[0]
        )));
    }

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > max_size {
        return Err(LdapError::MalformedMessage(format!(
            "Message too large: {} bytes (max {})",
            payload_len, max_size
        )));
    }

    let mut frame = vec![0u8; HEADER_SIZE + payload_len as usize];
    frame[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut frame[HEADER_SIZE..])?;
    }
    Ok(frame)
}

/// Read and decode one message from a stream
pub fn read_message<R: Read + ?Sized>(reader: &mut R, max_size: u32) -> Result<LdapMessage> {
    let frame = read_frame(reader, max_size)?;
    decode_message(&frame)
}

/// Encode and write one message to a stream
pub fn write_message<W: Write + ?Sized>(writer: &mut W, message: &LdapMessage) -> Result<()> {
    let bytes = encode_message(message);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
