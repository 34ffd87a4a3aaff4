//====================================================================

use std::collections::HashMap;

use crate::{
    error::BundleError,
    format::{self, BundleEntry},
    Hasher,
};

//====================================================================

/// A loaded bundle. Immutable once opened; shared between the bundle table
/// and any extraction that is still reading from it.
#[derive(Debug)]
pub struct Bundle {
    name: String,
    entries: HashMap<String, BundleEntry, Hasher>,
}

impl Bundle {
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, BundleError> {
        let entries = format::decode_entries(bytes)
            .map_err(|reason| BundleError::load_failed(name, reason))?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn entry(&self, name: &str) -> Option<&BundleEntry> {
        self.entries.get(name)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[inline]
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//====================================================================


//====================================================================
