//! The per-object entry table.

use crate::entry::Entry;
use std::collections::BTreeMap;

/// Object key → entries, iterated in lexicographic key order.
///
/// Every key present maps to a non-empty list: storing an empty list removes
/// the key instead. Pure data; locking and file I/O live in
/// [`HostsManager`](crate::HostsManager).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryTable {
    entries: BTreeMap<String, Vec<Entry>>,
}

impl EntryTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Replaces the entries for `key`. An empty `entries` removes the key.
    ///
    /// Returns `true` if the stored value changed.
    pub fn replace(&mut self, key: &str, entries: Vec<Entry>) -> bool {
        if entries.is_empty() {
            return self.remove(key);
        }
        if self.entries.get(key) == Some(&entries) {
            return false;
        }
        self.entries.insert(key.to_string(), entries);
        true
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every key. Returns `true` if the table was non-empty.
    pub fn clear(&mut self) -> bool {
        let had_entries = !self.entries.is_empty();
        self.entries.clear();
        had_entries
    }

    /// Returns a copy of the entries stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<Entry>> {
        self.entries.get(key).cloned()
    }

    /// Returns `true` if `key` has entries.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of object keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of entries across all keys.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(key, entries)` pairs in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Entry])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::build_entries;

    fn entries(ip: &str, hosts: &[&str]) -> Vec<Entry> {
        build_entries(ip, hosts).unwrap()
    }

    #[test]
    fn replace_and_get() {
        let mut t = EntryTable::new();
        assert!(t.replace("ns/a", entries("10.0.0.1", &["a.test"])));
        assert!(!t.replace("ns/a", entries("10.0.0.1", &["a.test"])));
        assert!(t.replace("ns/a", entries("10.0.0.2", &["a.test"])));

        let got = t.get("ns/a").unwrap();
        assert_eq!(got[0].ip().to_string(), "10.0.0.2");
        assert_eq!(t.entry_count(), 1);
    }

    #[test]
    fn empty_replace_removes() {
        let mut t = EntryTable::new();
        t.replace("ns/a", entries("10.0.0.1", &["a.test"]));
        assert!(t.replace("ns/a", Vec::new()));
        assert!(!t.contains_key("ns/a"));
        assert!(!t.replace("ns/a", Vec::new()));
    }

    #[test]
    fn keys_are_sorted() {
        let mut t = EntryTable::new();
        t.replace("ns/b", entries("10.0.0.2", &["b.test"]));
        t.replace("ns/a", entries("10.0.0.1", &["a.test"]));
        t.replace("default/z", entries("10.0.0.3", &["z.test"]));
        assert_eq!(t.keys().collect::<Vec<_>>(), ["default/z", "ns/a", "ns/b"]);
    }

    #[test]
    fn remove_and_clear_report_changes() {
        let mut t = EntryTable::new();
        assert!(!t.remove("missing"));
        assert!(!t.clear());

        t.replace("ns/a", entries("10.0.0.1", &["a.test", "b.test"]));
        assert_eq!(t.entry_count(), 2);
        assert!(t.clear());
        assert!(t.is_empty());
    }
}
