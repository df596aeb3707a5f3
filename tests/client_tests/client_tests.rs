//! Tests for Client
//!
//! These tests verify:
//! - Argument validation happens before anything is written
//! - Operations reach the server with the parsed arguments
//! - Paged search through the facade

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{entry_message, ok_response, search_done, test_config, Action, SpyTransport, StubServer};
use dirclient::client::Client;
use dirclient::error::LdapError;
use dirclient::model::{Attribute, Attributes, Dn, Filter, Modification, SearchScope};
use dirclient::network::{Session, SessionState};
use dirclient::protocol::{BindAuth, LdapMessage, LdapResult, ProtocolOp};

// =============================================================================
// Helper Functions
// =============================================================================

fn connect(server: &StubServer) -> Client {
    Client::connect_with_config(server.address(), test_config(2000)).unwrap()
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_invalid_arguments_never_reach_the_wire() {
    let (spy, writes) = SpyTransport::new();
    let client = Client::from_session(Session::establish(spy, test_config(2000)));

    assert!(matches!(client.delete(""), Err(LdapError::InvalidDn(_))));
    assert!(matches!(client.delete("not a dn"), Err(LdapError::InvalidDn(_))));
    assert!(matches!(
        client.add("", &Attributes::new()),
        Err(LdapError::InvalidDn(_))
    ));
    assert!(matches!(
        client.compare("", "cn", "x"),
        Err(LdapError::InvalidDn(_))
    ));
    assert!(matches!(
        client.modify("cn=x,dc=example", &[]),
        Err(LdapError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.search("dc=example", SearchScope::Subtree, "(cn=x", &[]),
        Err(LdapError::InvalidFilter(_))
    ));
    assert!(matches!(
        client.search("=bad", SearchScope::Subtree, "(cn=x)", &[]),
        Err(LdapError::InvalidDn(_))
    ));
    assert!(matches!(
        client.paged_search("dc=example", SearchScope::Subtree, "(cn=x)", &[], 0),
        Err(LdapError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.bind("cn=admin,dc=example", ""),
        Err(LdapError::InvalidArgument(_))
    ));
    assert!(matches!(
        client.extended("", None),
        Err(LdapError::InvalidArgument(_))
    ));

    assert_eq!(writes.load(Ordering::SeqCst), 0);
    assert_eq!(client.session().state(), SessionState::Connected);
}

#[test]
fn test_dispatcher_uses_configured_timeout() {
    let (spy, _) = SpyTransport::new();
    let client = Client::from_session(Session::establish(spy, test_config(1234)));
    assert_eq!(client.dispatcher().timeout(), Duration::from_millis(1234));
}

// =============================================================================
// Pass-Through Tests
// =============================================================================

#[test]
fn test_bind_and_updates() {
    let server = StubServer::always_ok();
    let client = connect(&server);

    client.bind("cn=admin,dc=example", "secret").unwrap();
    assert_eq!(client.session().state(), SessionState::Bound);

    let attributes = Attributes::new().with("cn", ["x"]).unwrap();
    client.add("cn=x,dc=example", &attributes).unwrap();
    client
        .modify(
            "cn=x,dc=example",
            &[Modification::ReplaceValues(Attribute::new("sn", ["y"]))],
        )
        .unwrap();
    client.delete("cn=x,dc=example").unwrap();
    client.close().unwrap();

    let received = server.join();
    let kinds: Vec<&str> = received.iter().map(|m| m.op.name()).collect();
    assert_eq!(
        kinds,
        vec![
            "BindRequest",
            "AddRequest",
            "ModifyRequest",
            "DelRequest",
            "UnbindRequest"
        ]
    );
    match &received[0].op {
        ProtocolOp::BindRequest { version, name, auth } => {
            assert_eq!(*version, 3);
            assert_eq!(name, "cn=admin,dc=example");
            assert_eq!(auth, &BindAuth::Simple(b"secret".to_vec()));
        }
        other => panic!("Expected BindRequest, got {:?}", other),
    }
}

#[test]
fn test_search_parses_arguments() {
    let server = StubServer::start(|request| {
        vec![
            Action::Send(entry_message(request.id, "cn=a,dc=example")),
            Action::Send(ok_response(request)),
        ]
    });
    let client = connect(&server);

    let result = client
        .search("dc=example", SearchScope::OneLevel, "(&(objectClass=person)(cn=a*))", &["cn", "mail"])
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].first_str("cn"), Some("cn=a,dc=example"));
    client.close().unwrap();

    match &server.join()[0].op {
        ProtocolOp::SearchRequest(request) => {
            assert_eq!(request.base, Dn::parse("dc=example").unwrap());
            assert_eq!(request.scope, SearchScope::OneLevel);
            assert_eq!(
                request.filter,
                Filter::parse("(&(objectClass=person)(cn=a*))").unwrap()
            );
            assert_eq!(request.attributes, vec!["cn", "mail"]);
            assert!(request.paging.is_none());
        }
        other => panic!("Expected SearchRequest, got {:?}", other),
    }
}

#[test]
fn test_root_search_base_allowed() {
    let server = StubServer::always_ok();
    let client = connect(&server);

    let result = client
        .search("", SearchScope::Base, "(objectClass=*)", &[])
        .unwrap();
    assert!(result.entries.is_empty());
}

#[test]
fn test_paged_search_streams_all_pages() {
    let mut calls = 0;
    let server = StubServer::start(move |request| {
        calls += 1;
        let cookie: &[u8] = if calls < 3 { b"more" } else { b"" };
        vec![
            Action::Send(entry_message(request.id, &format!("cn={},dc=example", calls))),
            Action::Send(search_done(request.id, Some(cookie))),
        ]
    });
    let client = connect(&server);

    let dns: Vec<String> = client
        .paged_search("dc=example", SearchScope::Subtree, "(cn=*)", &[], 1)
        .unwrap()
        .map(|entry| entry.unwrap().dn.to_string())
        .collect();
    assert_eq!(dns, vec!["cn=1,dc=example", "cn=2,dc=example", "cn=3,dc=example"]);
}

#[test]
fn test_compare_and_who_am_i() {
    let server = StubServer::start(|request| {
        let op = match &request.op {
            ProtocolOp::CompareRequest { .. } => {
                ProtocolOp::CompareResponse(LdapResult::new(dirclient::ResultCode::CompareTrue))
            }
            _ => ProtocolOp::ExtendedResponse {
                result: LdapResult::success(),
                name: None,
                value: Some(b"dn:cn=admin".to_vec()),
            },
        };
        vec![Action::Send(LdapMessage::new(request.id, op))]
    });
    let client = connect(&server);

    assert!(client.compare("cn=x,dc=example", "cn", "x").unwrap());
    assert_eq!(client.who_am_i().unwrap(), "dn:cn=admin");
}
