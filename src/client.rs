//! Client Facade
//!
//! One object bundling a session and a dispatcher behind string-based
//! arguments.
//!
//! The facade validates caller input before anything reaches the wire:
//! - DNs of add/modify/delete/compare must parse and must not be empty
//! - a modify needs at least one change
//! - filter text must parse
//! - a paged search needs a positive page size
//!
//! Everything else is passed through to the server unchanged.

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, ExtendedResult};
use crate::error::{LdapError, Result};
use crate::model::{Attributes, Dn, Filter, Modification, SearchRequest, SearchResult, SearchScope};
use crate::network::{SaslMechanism, SecurityUpgrade, Session};
use crate::paging::{PagedCursor, PagedEntries};
use crate::protocol::MessageId;

/// Directory client over a single session
pub struct Client {
    session: Session,
    dispatcher: Dispatcher,
}

impl Client {
    /// Connect to `address` (`host:port`) with default settings
    pub fn connect(address: &str) -> Result<Self> {
        Self::connect_with_config(address, ClientConfig::default())
    }

    pub fn connect_with_config(address: &str, config: ClientConfig) -> Result<Self> {
        Session::connect(address, config).map(Self::from_session)
    }

    /// Wrap an existing session (e.g. over a custom transport)
    pub fn from_session(session: Session) -> Self {
        let dispatcher = Dispatcher::from_config(session.config());
        Self {
            session,
            dispatcher,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // =========================================================================
    // Session Control
    // =========================================================================

    /// Upgrade the connection with StartTLS before any other request
    pub fn start_security(&self, upgrader: &dyn SecurityUpgrade) -> Result<()> {
        self.session.upgrade_transport_security(upgrader)
    }

    /// Simple bind; pass two empty strings for an anonymous bind
    ///
    /// A name without a password is refused locally: servers treat it as an
    /// unauthenticated bind that always "succeeds".
    pub fn bind(&self, name: &str, password: &str) -> Result<()> {
        if !name.is_empty() && password.is_empty() {
            return Err(LdapError::InvalidArgument(format!(
                "empty password for {}",
                name
            )));
        }
        self.session.bind(name, password)
    }

    pub fn sasl_bind(&self, mechanism: &mut dyn SaslMechanism) -> Result<()> {
        self.session.sasl_bind(mechanism)
    }

    /// Drop an outstanding request without waiting for the server
    pub fn abandon(&self, id: MessageId) -> Result<()> {
        self.session.abandon(id)
    }

    pub fn close(&self) -> Result<()> {
        self.session.close()
    }

    // =========================================================================
    // Update Operations
    // =========================================================================

    pub fn add(&self, dn: &str, attributes: &Attributes) -> Result<()> {
        let dn = entry_dn(dn)?;
        self.dispatcher.add(&self.session, &dn, attributes)
    }

    pub fn modify(&self, dn: &str, changes: &[Modification]) -> Result<()> {
        let dn = entry_dn(dn)?;
        if changes.is_empty() {
            return Err(LdapError::InvalidArgument(format!(
                "no modifications for {}",
                dn
            )));
        }
        self.dispatcher.modify(&self.session, &dn, changes)
    }

    pub fn delete(&self, dn: &str) -> Result<()> {
        let dn = entry_dn(dn)?;
        self.dispatcher.delete(&self.session, &dn)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn compare(&self, dn: &str, attr: &str, value: impl AsRef<[u8]>) -> Result<bool> {
        let dn = entry_dn(dn)?;
        self.dispatcher
            .compare(&self.session, &dn, attr, value.as_ref())
    }

    /// Search below `base`; an empty base addresses the root DSE
    pub fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
    ) -> Result<SearchResult> {
        let request = build_request(base, scope, filter, attributes)?;
        self.dispatcher.search(&self.session, &request)
    }

    /// Run a fully built search request
    pub fn search_request(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.dispatcher.search(&self.session, request)
    }

    /// Lazily stream every entry of a search, `page_size` at a time
    pub fn paged_search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        page_size: u32,
    ) -> Result<PagedEntries<'_>> {
        let cursor = PagedCursor::new(page_size)?;
        let request = build_request(base, scope, filter, attributes)?;
        Ok(cursor.entries(&self.dispatcher, &self.session, request))
    }

    // =========================================================================
    // Extended Operations
    // =========================================================================

    pub fn extended(&self, name: &str, value: Option<Vec<u8>>) -> Result<ExtendedResult> {
        if name.is_empty() {
            return Err(LdapError::InvalidArgument(
                "extended operation needs an OID".to_string(),
            ));
        }
        self.dispatcher.extended(&self.session, name, value)
    }

    pub fn who_am_i(&self) -> Result<String> {
        self.dispatcher.who_am_i(&self.session)
    }

    /// Cancel an outstanding request and wait for the server to confirm
    pub fn cancel(&self, id: MessageId) -> Result<()> {
        self.dispatcher.cancel(&self.session, id)
    }
}

/// DN naming an entry: must parse and must not be the root
fn entry_dn(text: &str) -> Result<Dn> {
    let dn = Dn::parse(text)?;
    if dn.is_root() {
        return Err(LdapError::InvalidDn("DN must not be empty".to_string()));
    }
    Ok(dn)
}

fn build_request(
    base: &str,
    scope: SearchScope,
    filter: &str,
    attributes: &[&str],
) -> Result<SearchRequest> {
    let base = Dn::parse(base)?;
    let filter = Filter::parse(filter)?;
    Ok(SearchRequest::new(base, scope, filter).attributes(attributes.iter().copied()))
}
