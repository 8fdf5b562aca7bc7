//! Version history of every logical id, plus the store-wide change feed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use octofhir_storage::{Entry, Key, StorageError, Version};
use time::OffsetDateTime;

#[derive(Debug, Default)]
struct ResourceHistory {
    /// Ascending by sequence; never empty.
    entries: Vec<Arc<Entry>>,
    last_version: u64,
}

#[derive(Debug, Default)]
pub struct HistoryIndex {
    by_id: HashMap<Key, ResourceHistory>,
    feed: BTreeMap<u64, Arc<Entry>>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label the next version of `key` would get.
    pub fn next_version(&self, key: &Key) -> u64 {
        self.by_id.get(key).map_or(0, |h| h.last_version) + 1
    }

    /// Whether `version` and `sequence` may follow what is already stored for `key`.
    pub fn check_append(&self, key: &Key, version: u64, sequence: u64) -> Result<(), StorageError> {
        if let Some((&last_seq, _)) = self.feed.last_key_value()
            && sequence <= last_seq
        {
            return Err(StorageError::internal(format!(
                "sequence {sequence} for {key} does not follow {last_seq}"
            )));
        }
        let last_version = self.by_id.get(key).map_or(0, |h| h.last_version);
        if version <= last_version {
            return Err(StorageError::internal(format!(
                "version {version} for {key} does not follow {last_version}"
            )));
        }
        Ok(())
    }

    /// Append a committed entry.
    ///
    /// Rejects entries that would break per-id ordering: the sequence and the
    /// numeric version must both grow.
    pub fn append(&mut self, entry: Entry) -> Result<Arc<Entry>, StorageError> {
        let version: u64 = entry.version().parse().map_err(|_| {
            StorageError::internal(format!("non-numeric version label on {}", entry.key))
        })?;
        self.check_append(&entry.key, version, entry.sequence)?;

        let entry = Arc::new(entry);
        let history = self.by_id.entry(entry.key.without_version()).or_default();
        history.last_version = version;
        history.entries.push(entry.clone());
        self.feed.insert(entry.sequence, entry.clone());
        Ok(entry)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.by_id.contains_key(key)
    }

    pub fn current(&self, key: &Key) -> Option<&Arc<Entry>> {
        self.by_id.get(key).and_then(|h| h.entries.last())
    }

    /// Current entry for an unversioned key, that exact version otherwise.
    pub fn resolve(&self, key: &Key) -> Option<&Arc<Entry>> {
        match &key.version {
            Version::Unversioned => self.current(key),
            Version::Versioned(label) => self
                .by_id
                .get(key)?
                .entries
                .iter()
                .find(|e| e.version() == label),
        }
    }

    /// All versions of one id, oldest first.
    pub fn versions(&self, key: &Key) -> Option<&[Arc<Entry>]> {
        self.by_id.get(key).map(|h| h.entries.as_slice())
    }

    /// Global feed in commit order, optionally restricted to one type.
    pub fn feed<'a>(
        &'a self,
        resource_type: Option<&'a str>,
        since: Option<OffsetDateTime>,
    ) -> impl Iterator<Item = &'a Arc<Entry>> + 'a {
        self.feed.values().filter(move |e| {
            resource_type.is_none_or(|t| e.key.resource_type == t)
                && since.is_none_or(|s| e.created_at >= s)
        })
    }

    /// Current entries of every id, optionally restricted to one type.
    pub fn currents<'a>(
        &'a self,
        resource_type: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Arc<Entry>> + 'a {
        self.by_id
            .iter()
            .filter(move |(k, _)| resource_type.is_none_or(|t| k.resource_type == t))
            .filter_map(|(_, h)| h.entries.last())
    }

    /// Drop every version of one id. Returns how many were removed.
    pub fn remove(&mut self, key: &Key) -> usize {
        let Some(history) = self.by_id.remove(key) else {
            return 0;
        };
        for entry in &history.entries {
            self.feed.remove(&entry.sequence);
        }
        history.entries.len()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.feed.clear();
    }

    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn entry_count(&self) -> usize {
        self.feed.len()
    }
}
