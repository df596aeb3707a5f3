//! Tests for Dispatcher
//!
//! These tests verify:
//! - Result interpretation for each operation
//! - Modify sends every change in one request
//! - Timeouts, late responses and abandon
//! - Out-of-order responses reach the right caller

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{connect, entry_message, ok_response, response_with, Action, StubServer};
use dirclient::dispatcher::Dispatcher;
use dirclient::error::LdapError;
use dirclient::model::{
    Attribute, Attributes, Dn, Filter, Modification, SearchRequest, SearchScope,
};
use dirclient::network::SessionState;
use dirclient::protocol::{
    LdapMessage, LdapResult, ProtocolOp, ResultCode, SearchDone, CANCEL_OID, WHO_AM_I_OID,
};
use parking_lot::Mutex;

// =============================================================================
// Helper Functions
// =============================================================================

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Duration::from_secs(2))
}

fn dn(text: &str) -> Dn {
    Dn::parse(text).unwrap()
}

fn subtree(base: &str) -> SearchRequest {
    SearchRequest::new(dn(base), SearchScope::Subtree, Filter::match_all())
}

/// Apply every change or none, like a directory server would
fn apply_all(entry: &mut Attributes, changes: &[Modification]) -> ResultCode {
    let mut staged = entry.clone();
    for change in changes {
        let attr = change.attribute();
        match change {
            Modification::AddValues(_) => match staged.get_mut(attr.name()) {
                Some(existing) => {
                    for value in attr.values() {
                        existing.insert(value.clone());
                    }
                }
                None => staged.insert(attr.clone()).unwrap(),
            },
            Modification::DeleteValues(_) => {
                let now_empty = match staged.get_mut(attr.name()) {
                    Some(existing) => {
                        for value in attr.values() {
                            if !existing.remove(value) {
                                return ResultCode::NoSuchAttribute;
                            }
                        }
                        existing.is_empty()
                    }
                    None => return ResultCode::NoSuchAttribute,
                };
                if attr.is_empty() || now_empty {
                    staged.remove(attr.name());
                }
            }
            Modification::ReplaceValues(_) => {
                staged.remove(attr.name());
                if !attr.is_empty() {
                    staged.insert(attr.clone()).unwrap();
                }
            }
        }
    }
    *entry = staged;
    ResultCode::Success
}

// =============================================================================
// Update Operation Tests
// =============================================================================

#[test]
fn test_add_and_delete_succeed() {
    let server = StubServer::always_ok();
    let session = connect(&server);
    let attributes = Attributes::new()
        .with("objectClass", ["person"])
        .and_then(|a| a.with("cn", ["x"]))
        .unwrap();

    dispatcher().add(&session, &dn("cn=x,dc=example"), &attributes).unwrap();
    dispatcher().delete(&session, &dn("cn=x,dc=example")).unwrap();

    session.close().unwrap();
    let received = server.join();
    match &received[0].op {
        ProtocolOp::AddRequest(entry) => {
            assert_eq!(entry.dn, dn("cn=x,dc=example"));
            assert_eq!(entry.attributes, attributes);
        }
        other => panic!("Expected AddRequest, got {:?}", other),
    }
    assert_eq!(received[1].op, ProtocolOp::DelRequest(dn("cn=x,dc=example")));
}

#[test]
fn test_server_error_is_typed_and_session_survives() {
    let server = StubServer::start(|request| {
        let reply = match request.op {
            ProtocolOp::AddRequest(_) => LdapMessage::new(
                request.id,
                ProtocolOp::AddResponse(LdapResult {
                    code: ResultCode::EntryAlreadyExists,
                    matched_dn: "dc=example".to_string(),
                    diagnostic: "already there".to_string(),
                    referrals: vec![],
                }),
            ),
            _ => ok_response(request),
        };
        vec![Action::Send(reply)]
    });
    let session = connect(&server);

    let result = dispatcher().add(&session, &dn("cn=x,dc=example"), &Attributes::new());
    match result {
        Err(LdapError::Operation {
            code,
            diagnostic,
            matched_dn,
        }) => {
            assert_eq!(code, ResultCode::EntryAlreadyExists);
            assert_eq!(diagnostic, "already there");
            assert_eq!(matched_dn, "dc=example");
        }
        other => panic!("Expected Operation error, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Connected);
    dispatcher().delete(&session, &dn("cn=x,dc=example")).unwrap();
}

#[test]
fn test_modify_is_one_atomic_request() {
    let entry = Arc::new(Mutex::new(Attributes::new().with("sn", ["Doe"]).unwrap()));
    let store = Arc::clone(&entry);
    let server = StubServer::start(move |request| {
        let code = match &request.op {
            ProtocolOp::ModifyRequest { changes, .. } => apply_all(&mut store.lock(), changes),
            _ => ResultCode::Success,
        };
        vec![Action::Send(response_with(request, code))]
    });
    let session = connect(&server);
    let target = dn("uid=jdoe,dc=example");

    // the middle change fails, so neither neighbour may be applied
    let failing = [
        Modification::AddValues(Attribute::new("mail", ["j@example.com"])),
        Modification::DeleteValues(Attribute::new("sn", ["Smith"])),
        Modification::ReplaceValues(Attribute::new("description", ["contractor"])),
    ];
    let result = dispatcher().modify(&session, &target, &failing);
    assert!(matches!(
        result,
        Err(LdapError::Operation {
            code: ResultCode::NoSuchAttribute,
            ..
        })
    ));
    {
        let entry = entry.lock();
        assert!(entry.get("mail").is_none());
        assert!(entry.get("description").is_none());
        assert_eq!(entry.get("sn").unwrap().str_values().collect::<Vec<_>>(), vec!["Doe"]);
    }

    let passing = [
        Modification::AddValues(Attribute::new("mail", ["j@example.com"])),
        Modification::ReplaceValues(Attribute::new("sn", ["Dough"])),
    ];
    dispatcher().modify(&session, &target, &passing).unwrap();
    {
        let entry = entry.lock();
        assert!(entry.get("mail").unwrap().contains(b"j@example.com"));
        assert_eq!(entry.get("sn").unwrap().str_values().collect::<Vec<_>>(), vec!["Dough"]);
    }

    session.close().unwrap();
    let modifies: Vec<_> = server
        .join()
        .into_iter()
        .filter_map(|m| match m.op {
            ProtocolOp::ModifyRequest { changes, .. } => Some(changes.len()),
            _ => None,
        })
        .collect();
    assert_eq!(modifies, vec![3, 2]);
}

// =============================================================================
// Compare Tests
// =============================================================================

#[test]
fn test_compare_three_outcomes() {
    let server = StubServer::start(|request| {
        let code = match &request.op {
            ProtocolOp::CompareRequest { value, .. } if value == b"yes" => ResultCode::CompareTrue,
            ProtocolOp::CompareRequest { value, .. } if value == b"no" => ResultCode::CompareFalse,
            _ => ResultCode::NoSuchObject,
        };
        vec![Action::Send(response_with(request, code))]
    });
    let session = connect(&server);
    let target = dn("cn=x,dc=example");
    let d = dispatcher();

    assert!(d.compare(&session, &target, "cn", b"yes").unwrap());
    assert!(!d.compare(&session, &target, "cn", b"no").unwrap());
    match d.compare(&session, &target, "cn", b"gone") {
        Err(e) => assert_eq!(e.result_code(), Some(ResultCode::NoSuchObject)),
        Ok(v) => panic!("Expected error, got {}", v),
    }
}

#[test]
fn test_wrong_response_kind_is_reported() {
    let server = StubServer::start(|request| {
        vec![Action::Send(LdapMessage::new(
            request.id,
            ProtocolOp::AddResponse(LdapResult::success()),
        ))]
    });
    let session = connect(&server);

    let result = dispatcher().delete(&session, &dn("cn=x"));
    match result {
        Err(LdapError::UnexpectedResponse { expected, got }) => {
            assert_eq!(expected, "DelResponse");
            assert_eq!(got, "AddResponse");
        }
        other => panic!("Expected UnexpectedResponse, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Connected);
}

// =============================================================================
// Search Tests
// =============================================================================

#[test]
fn test_search_collects_entries_and_references() {
    let server = StubServer::start(|request| {
        vec![
            Action::Send(entry_message(request.id, "cn=a,dc=example")),
            Action::Send(LdapMessage::new(
                request.id,
                ProtocolOp::SearchResultReference(vec!["ldap://other/dc=example".to_string()]),
            )),
            Action::Send(entry_message(request.id, "cn=b,dc=example")),
            Action::Send(ok_response(request)),
        ]
    });
    let session = connect(&server);

    let result = dispatcher().search(&session, &subtree("dc=example")).unwrap();
    let dns: Vec<String> = result.entries.iter().map(|e| e.dn.to_string()).collect();
    assert_eq!(dns, vec!["cn=a,dc=example", "cn=b,dc=example"]);
    assert_eq!(result.referrals, vec!["ldap://other/dc=example"]);
    assert!(!result.has_more_pages());
}

#[test]
fn test_search_size_limit_returns_partial_results() {
    let server = StubServer::start(|request| {
        vec![
            Action::Send(entry_message(request.id, "cn=a,dc=example")),
            Action::Send(response_with(request, ResultCode::SizeLimitExceeded)),
        ]
    });
    let session = connect(&server);

    let result = dispatcher()
        .search(&session, &subtree("dc=example").size_limit(1))
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.result.code, ResultCode::SizeLimitExceeded);
}

#[test]
fn test_search_failure_is_operation_error() {
    let server = StubServer::start(|request| {
        vec![Action::Send(LdapMessage::new(
            request.id,
            ProtocolOp::SearchResultDone(SearchDone {
                result: LdapResult {
                    code: ResultCode::NoSuchObject,
                    matched_dn: "dc=example".to_string(),
                    diagnostic: String::new(),
                    referrals: vec![],
                },
                paging: None,
            }),
        ))]
    });
    let session = connect(&server);

    let result = dispatcher().search(&session, &subtree("ou=missing,dc=example"));
    match result {
        Err(LdapError::Operation { code, matched_dn, .. }) => {
            assert_eq!(code, ResultCode::NoSuchObject);
            assert_eq!(matched_dn, "dc=example");
        }
        other => panic!("Expected Operation error, got {:?}", other),
    }
}

// =============================================================================
// Extended Operation Tests
// =============================================================================

#[test]
fn test_who_am_i() {
    let server = StubServer::start(|request| {
        vec![Action::Send(LdapMessage::new(
            request.id,
            ProtocolOp::ExtendedResponse {
                result: LdapResult::success(),
                name: None,
                value: Some(b"dn:cn=admin,dc=example".to_vec()),
            },
        ))]
    });
    let session = connect(&server);

    assert_eq!(dispatcher().who_am_i(&session).unwrap(), "dn:cn=admin,dc=example");

    session.close().unwrap();
    match &server.join()[0].op {
        ProtocolOp::ExtendedRequest { name, value } => {
            assert_eq!(name, WHO_AM_I_OID);
            assert!(value.is_none());
        }
        other => panic!("Expected ExtendedRequest, got {:?}", other),
    }
}

#[test]
fn test_cancel_sends_target_id() {
    let server = StubServer::start(|request| {
        vec![Action::Send(response_with(request, ResultCode::Canceled))]
    });
    let session = connect(&server);

    dispatcher().cancel(&session, 42).unwrap();

    session.close().unwrap();
    match &server.join()[0].op {
        ProtocolOp::ExtendedRequest { name, value } => {
            assert_eq!(name, CANCEL_OID);
            assert_eq!(
                value.as_deref(),
                Some(&[0x30, 0, 0, 0, 9, 0x02, 0, 0, 0, 4, 0, 0, 0, 42][..])
            );
        }
        other => panic!("Expected ExtendedRequest, got {:?}", other),
    }
}

#[test]
fn test_cancel_refused_is_operation_error() {
    let server = StubServer::start(|request| {
        vec![Action::Send(response_with(request, ResultCode::TooLate))]
    });
    let session = connect(&server);

    let result = dispatcher().cancel(&session, 7);
    assert_eq!(result.unwrap_err().result_code(), Some(ResultCode::TooLate));
}

// =============================================================================
// Timeout / Abandon Tests
// =============================================================================

#[test]
fn test_timeout_returns_within_margin() {
    let mut first = true;
    let server = StubServer::start(move |request| {
        if std::mem::replace(&mut first, false) {
            // never answer the first request
            vec![]
        } else {
            vec![Action::Send(ok_response(request))]
        }
    });
    let session = connect(&server);
    let quick = Dispatcher::new(Duration::from_millis(50));

    let started = Instant::now();
    let result = quick.delete(&session, &dn("cn=x"));
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LdapError::OperationTimeout(50))));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
    assert_eq!(session.pending_count(), 0);
    assert_eq!(session.state(), SessionState::Connected);

    // no retry happened and the session still works
    dispatcher().delete(&session, &dn("cn=y")).unwrap();
    session.close().unwrap();
    let deletes = server
        .join()
        .iter()
        .filter(|m| matches!(m.op, ProtocolOp::DelRequest(_)))
        .count();
    assert_eq!(deletes, 2);
}

#[test]
fn test_late_response_is_discarded() {
    let mut first = true;
    let server = StubServer::start(move |request| {
        if std::mem::replace(&mut first, false) {
            vec![
                Action::Delay(Duration::from_millis(150)),
                Action::Send(response_with(request, ResultCode::NoSuchObject)),
            ]
        } else {
            vec![Action::Send(ok_response(request))]
        }
    });
    let session = connect(&server);

    let quick = Dispatcher::new(Duration::from_millis(50));
    let result = quick.delete(&session, &dn("cn=x"));
    assert!(matches!(result, Err(LdapError::OperationTimeout(_))));

    // the stale noSuchObject must not be mistaken for this answer
    dispatcher().delete(&session, &dn("cn=y")).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_abandon_releases_waiter() {
    let server = StubServer::start(|request| match request.op {
        ProtocolOp::SearchRequest(_) | ProtocolOp::AbandonRequest(_) => vec![],
        _ => vec![Action::Send(ok_response(request))],
    });
    let session = connect(&server);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| dispatcher().search(&session, &subtree("dc=example")));

        let deadline = Instant::now() + Duration::from_secs(2);
        while session.pending_count() == 0 {
            assert!(Instant::now() < deadline, "search never became pending");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(session.is_pending(1));
        session.abandon(1).unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(LdapError::Abandoned(1))));
    });

    dispatcher().delete(&session, &dn("cn=x")).unwrap();
    session.close().unwrap();
    let received = server.join();
    assert!(received
        .iter()
        .any(|m| m.op == ProtocolOp::AbandonRequest(1)));
}

// =============================================================================
// Pipelining Tests
// =============================================================================

#[test]
fn test_out_of_order_responses_reach_their_callers() {
    let mut held: Option<LdapMessage> = None;
    let server = StubServer::start(move |request| {
        let verdict = |m: &LdapMessage| match &m.op {
            ProtocolOp::CompareRequest { value, .. } if value == b"yes" => ResultCode::CompareTrue,
            _ => ResultCode::CompareFalse,
        };
        match held.take() {
            None => {
                held = Some(request.clone());
                vec![]
            }
            Some(first) => vec![
                Action::Send(response_with(request, verdict(request))),
                Action::Send(response_with(&first, verdict(&first))),
            ],
        }
    });
    let session = connect(&server);
    let target = dn("cn=x,dc=example");

    thread::scope(|scope| {
        let yes = scope.spawn(|| dispatcher().compare(&session, &target, "cn", b"yes"));
        let no = scope.spawn(|| dispatcher().compare(&session, &target, "cn", b"no"));
        assert!(yes.join().unwrap().unwrap());
        assert!(!no.join().unwrap().unwrap());
    });
    assert_eq!(session.pending_count(), 0);
}
