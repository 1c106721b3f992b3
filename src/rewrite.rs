//! Rewrite rules.
//!
//! The rewrite table maps normalized domain names to the IPv4 address that
//! should be served for them instead of asking upstream. It is built once at
//! startup and shared read-only by every query handler.

use std::collections::HashMap;

/// Normalize a domain name for rewrite lookups.
///
/// Names are lowercased and made fully qualified, so `Internal.Example` and
/// `internal.example.` both become `internal.example.`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = name.to_lowercase();
    if !normalized.ends_with('.') {
        normalized.push('.');
    }
    normalized
}

/// Immutable mapping from normalized domain name to replacement address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteTable {
    entries: HashMap<String, String>,
}

impl RewriteTable {
    /// Build a table from raw `(domain, address)` pairs.
    ///
    /// Keys are normalized with [`normalize_name`]. When two keys normalize
    /// to the same name, the one that comes later in `entries` wins.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = HashMap::new();
        for (domain, address) in entries {
            map.insert(normalize_name(domain.as_ref()), address.into());
        }
        Self { entries: map }
    }

    /// Look up the replacement address for an already normalized name.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
