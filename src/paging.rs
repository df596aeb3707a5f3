//! Paged Search Cursor
//!
//! Walks a large result set one server-sized page at a time using the
//! paged results control.
//!
//! ## States
//! ```text
//!   NotStarted ──fetch──▶ HasMore(cookie) ──fetch──▶ ... ──▶ Exhausted
//!        │                                                     ▲
//!        └────────────fetch, empty cookie──────────────────────┘
//! ```
//!
//! The cookie returned with one page is sent with the request for the next.
//! A failed fetch leaves the cursor where it was, so the caller may retry.

use crate::dispatcher::Dispatcher;
use crate::error::{LdapError, Result};
use crate::model::{Entry, SearchRequest, SearchResult};
use crate::network::Session;

/// Position of a paged search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    NotStarted,
    /// Server holds more results under this cookie
    HasMore(Vec<u8>),
    Exhausted,
}

/// Cursor over the pages of one search
#[derive(Debug, Clone)]
pub struct PagedCursor {
    state: CursorState,
    page_size: u32,
}

impl PagedCursor {
    /// New cursor; `page_size` must be positive
    pub fn new(page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(LdapError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }
        Ok(Self {
            state: CursorState::NotStarted,
            page_size,
        })
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Fetch the next page of `request`
    ///
    /// The request's own paging settings are replaced by the cursor's. A
    /// response without a paging control is treated as the last page.
    pub fn fetch_next(
        &mut self,
        dispatcher: &Dispatcher,
        session: &Session,
        request: &SearchRequest,
    ) -> Result<SearchResult> {
        let cookie = match &self.state {
            CursorState::NotStarted => Vec::new(),
            CursorState::HasMore(cookie) => cookie.clone(),
            CursorState::Exhausted => return Err(LdapError::CursorExhausted),
        };

        let page_request = request.clone().with_paging(self.page_size, cookie);
        let page = dispatcher.search(session, &page_request)?;

        self.state = if page.cookie.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::HasMore(page.cookie.clone())
        };

        tracing::debug!(
            "Fetched page of {} entries, more: {}",
            page.entries.len(),
            !self.is_exhausted()
        );
        Ok(page)
    }

    /// Lazy sequence of every entry across all remaining pages
    pub fn entries<'a>(
        self,
        dispatcher: &'a Dispatcher,
        session: &'a Session,
        request: SearchRequest,
    ) -> PagedEntries<'a> {
        PagedEntries {
            cursor: self,
            dispatcher,
            session,
            request,
            buffer: Vec::new().into_iter(),
            failed: false,
        }
    }
}

/// Entries of a paged search, fetched a page at a time as consumed
///
/// Single pass. A fetch error is yielded once and ends the sequence.
pub struct PagedEntries<'a> {
    cursor: PagedCursor,
    dispatcher: &'a Dispatcher,
    session: &'a Session,
    request: SearchRequest,
    buffer: std::vec::IntoIter<Entry>,
    failed: bool,
}

impl PagedEntries<'_> {
    pub fn cursor(&self) -> &PagedCursor {
        &self.cursor
    }
}

impl Iterator for PagedEntries<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.next() {
                return Some(Ok(entry));
            }
            if self.failed || self.cursor.is_exhausted() {
                return None;
            }

            match self
                .cursor
                .fetch_next(self.dispatcher, self.session, &self.request)
            {
                Ok(page) => self.buffer = page.entries.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
