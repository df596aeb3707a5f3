//! Data Model
//!
//! Typed values exchanged with the directory:
//! - `Dn`: parsed distinguished names
//! - `Attribute` / `Attributes` / `Entry`: name-indexed value sets
//! - `Modification`: add/delete/replace changes for a modify request
//! - `Filter`: compiled search filter trees
//! - `SearchRequest` / `SearchResult`: search inputs and outputs

mod dn;
mod entry;
mod filter;
mod search;

pub use dn::{Ava, Dn, Rdn};
pub use entry::{Attribute, Attributes, Entry, Modification};
pub use filter::{Filter, MAX_FILTER_DEPTH};
pub use search::{DerefAliases, PageControl, SearchRequest, SearchResult, SearchScope};
