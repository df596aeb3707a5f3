//! Attributes, entries and modifications

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{LdapError, Result};
use super::Dn;

/// A named set of byte-string values
///
/// Names compare case-insensitively; value order is irrelevant.
#[derive(Debug, Clone, Eq)]
pub struct Attribute {
    name: String,
    values: BTreeSet<Vec<u8>>,
}

impl Attribute {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Attribute with no values (used to delete a whole attribute)
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &BTreeSet<Vec<u8>> {
        &self.values
    }

    pub fn contains(&self, value: &[u8]) -> bool {
        self.values.contains(value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Values that are valid UTF-8, in set order
    pub fn str_values(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter_map(|v| std::str::from_utf8(v).ok())
    }

    pub fn insert(&mut self, value: impl Into<Vec<u8>>) -> bool {
        self.values.insert(value.into())
    }

    pub fn remove(&mut self, value: &[u8]) -> bool {
        self.values.remove(value)
    }

    fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.values == other.values
    }
}

/// Name-indexed attribute collection without duplicate names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    by_name: BTreeMap<String, Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, rejecting repeated names
    pub fn from_list(attributes: impl IntoIterator<Item = Attribute>) -> Result<Self> {
        let mut out = Self::new();
        for attribute in attributes {
            out.insert(attribute)?;
        }
        Ok(out)
    }

    /// Chainable insert of `name` with `values`
    pub fn with<I, V>(mut self, name: impl Into<String>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self.insert(Attribute::new(name, values))?;
        Ok(self)
    }

    pub fn insert(&mut self, attribute: Attribute) -> Result<()> {
        match self.by_name.entry(attribute.key()) {
            btree_map::Entry::Occupied(_) => {
                Err(LdapError::DuplicateAttribute(attribute.name))
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(attribute);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.by_name.get_mut(&name.to_ascii_lowercase())
    }

    /// Insert or overwrite, ignoring duplicates
    pub fn replace(&mut self, attribute: Attribute) -> Option<Attribute> {
        self.by_name.insert(attribute.key(), attribute)
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        self.by_name.remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl IntoIterator for Attributes {
    type Item = Attribute;
    type IntoIter = btree_map::IntoValues<String, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_name.into_values()
    }
}

/// A directory entry: identity plus attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: Dn,
    pub attributes: Attributes,
}

impl Entry {
    pub fn new(dn: Dn, attributes: Attributes) -> Self {
        Self { dn, attributes }
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// First UTF-8 value of `name`
    pub fn first_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|a| a.str_values().next())
    }
}

/// One change inside a modify request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values, creating the attribute if needed
    AddValues(Attribute),

    /// Remove the listed values; an empty set removes the attribute
    DeleteValues(Attribute),

    /// Replace all values; an empty set removes the attribute
    ReplaceValues(Attribute),
}

impl Modification {
    pub fn attribute(&self) -> &Attribute {
        match self {
            Modification::AddValues(a)
            | Modification::DeleteValues(a)
            | Modification::ReplaceValues(a) => a,
        }
    }

    /// Wire operation code
    pub fn code(&self) -> u32 {
        match self {
            Modification::AddValues(_) => 0,
            Modification::DeleteValues(_) => 1,
            Modification::ReplaceValues(_) => 2,
        }
    }

    pub fn from_code(code: u32, attribute: Attribute) -> Option<Self> {
        match code {
            0 => Some(Modification::AddValues(attribute)),
            1 => Some(Modification::DeleteValues(attribute)),
            2 => Some(Modification::ReplaceValues(attribute)),
            _ => None,
        }
    }
}
