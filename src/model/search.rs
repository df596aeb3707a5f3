//! Search requests and results

use crate::error::{LdapError, Result};
use crate::protocol::LdapResult;
use super::{Dn, Entry, Filter};

/// How far below the base DN a search reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SearchScope {
    /// The base entry only
    Base = 0,
    /// Immediate children of the base
    OneLevel = 1,
    /// The base and everything below it
    Subtree = 2,
}

impl TryFrom<u32> for SearchScope {
    type Error = LdapError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(SearchScope::Base),
            1 => Ok(SearchScope::OneLevel),
            2 => Ok(SearchScope::Subtree),
            _ => Err(LdapError::MalformedMessage(format!(
                "Invalid search scope: {}",
                value
            ))),
        }
    }
}

/// Alias dereferencing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum DerefAliases {
    #[default]
    Never = 0,
    InSearching = 1,
    FindingBase = 2,
    Always = 3,
}

impl TryFrom<u32> for DerefAliases {
    type Error = LdapError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(DerefAliases::Never),
            1 => Ok(DerefAliases::InSearching),
            2 => Ok(DerefAliases::FindingBase),
            3 => Ok(DerefAliases::Always),
            _ => Err(LdapError::MalformedMessage(format!(
                "Invalid deref aliases policy: {}",
                value
            ))),
        }
    }
}

/// Paging control carried on a search request or its final response
///
/// On a request `size` is the wanted page size and `cookie` is empty for the
/// first page. On a response `size` is the server's estimate and an empty
/// cookie means no more pages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageControl {
    pub size: u32,
    pub cookie: Vec<u8>,
    /// Criticality flag of the control carrying these values
    pub critical: bool,
}

/// A search operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: Dn,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    /// 0 = no client-requested limit
    pub size_limit: u32,
    /// Seconds, 0 = no client-requested limit
    pub time_limit: u32,
    pub types_only: bool,
    pub filter: Filter,
    /// Empty = all user attributes
    pub attributes: Vec<String>,
    pub paging: Option<PageControl>,
}

impl SearchRequest {
    pub fn new(base: Dn, scope: SearchScope, filter: Filter) -> Self {
        Self {
            base,
            scope,
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: Vec::new(),
            paging: None,
        }
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn size_limit(mut self, limit: u32) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = seconds;
        self
    }

    pub fn types_only(mut self, types_only: bool) -> Self {
        self.types_only = types_only;
        self
    }

    pub fn deref_aliases(mut self, deref: DerefAliases) -> Self {
        self.deref_aliases = deref;
        self
    }

    pub fn with_paging(mut self, size: u32, cookie: Vec<u8>) -> Self {
        self.paging = Some(PageControl {
            size,
            cookie,
            critical: false,
        });
        self
    }
}

/// Everything a search produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub entries: Vec<Entry>,
    /// Continuation URLs from search result references
    pub referrals: Vec<String>,
    pub result: LdapResult,
    /// Paging cookie from the response; empty when exhausted or not paged
    pub cookie: Vec<u8>,
}

impl SearchResult {
    /// Whether the server signalled another page
    pub fn has_more_pages(&self) -> bool {
        !self.cookie.is_empty()
    }
}
