//! Implementation of the FhirStore trait for InMemoryStore.

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use octofhir_storage::{
    Entry, FhirStore, HistoryParams, HistoryScope, Key, NewEntry, SearchParams, SearchResult,
    SortParam, StorageError, Version,
};

use crate::storage::InMemoryStore;

/// Render search parameters the way they would appear in a query string.
fn describe_query(params: &SearchParams) -> String {
    let mut names: Vec<&String> = params.parameters.keys().collect();
    names.sort();
    let pairs: Vec<String> = names
        .into_iter()
        .flat_map(|name| {
            params.parameters[name]
                .iter()
                .map(move |value| format!("{name}={value}"))
        })
        .collect();
    format!("?{}", pairs.join("&"))
}

fn page<T>(items: impl Iterator<Item = T>, offset: Option<u32>, count: Option<u32>) -> Vec<T> {
    items
        .skip(offset.unwrap_or(0) as usize)
        .take(count.map_or(usize::MAX, |c| c as usize))
        .collect()
}

#[async_trait]
impl FhirStore for InMemoryStore {
    #[instrument(skip(self))]
    async fn list(
        &self,
        resource_type: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state.catalog.list(resource_type, since))
    }

    #[instrument(skip(self))]
    async fn history(
        &self,
        scope: &HistoryScope,
        params: &HistoryParams,
    ) -> Result<Vec<Key>, StorageError> {
        let state = self.state.read().await;
        let since = params.since;
        let keys = match scope {
            HistoryScope::System => page(
                state.history.feed(None, since).map(|e| e.key.clone()),
                params.offset,
                params.count,
            ),
            HistoryScope::Type(resource_type) => page(
                state
                    .history
                    .feed(Some(resource_type.as_str()), since)
                    .map(|e| e.key.clone()),
                params.offset,
                params.count,
            ),
            HistoryScope::Resource(key) => {
                let versions = state
                    .history
                    .versions(key)
                    .ok_or_else(|| StorageError::not_found(&key.resource_type, &key.id))?;
                page(
                    versions
                        .iter()
                        .filter(|e| since.is_none_or(|s| e.created_at >= s))
                        .map(|e| e.key.clone()),
                    params.offset,
                    params.count,
                )
            }
        };
        Ok(keys)
    }

    async fn exists(&self, key: &Key) -> Result<bool, StorageError> {
        let state = self.state.read().await;
        Ok(state.history.resolve(key).is_some())
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn get(&self, key: &Key) -> Result<Entry, StorageError> {
        let state = self.state.read().await;
        if let Some(entry) = state.history.resolve(key) {
            return Ok((**entry).clone());
        }
        match &key.version {
            Version::Versioned(label) if state.history.contains(key) => Err(
                StorageError::version_not_found(&key.resource_type, &key.id, label),
            ),
            _ => Err(StorageError::not_found(&key.resource_type, &key.id)),
        }
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn get_batch(&self, keys: &[Key], sort_by: &str) -> Result<Vec<Entry>, StorageError> {
        let mut entries: Vec<Entry> = {
            let state = self.state.read().await;
            keys.iter()
                .filter_map(|key| state.history.resolve(key))
                .map(|e| (**e).clone())
                .collect()
        };
        self.sort_entries(&mut entries, &SortParam::parse(sort_by));
        Ok(entries)
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn get_current(
        &self,
        keys: &[Key],
        sort_by: &str,
    ) -> Result<Vec<Entry>, StorageError> {
        let mut entries: Vec<Entry> = {
            let state = self.state.read().await;
            keys.iter()
                .filter_map(|key| state.history.current(key))
                .filter(|e| e.is_present())
                .map(|e| (**e).clone())
                .collect()
        };
        self.sort_entries(&mut entries, &SortParam::parse(sort_by));
        Ok(entries)
    }

    #[instrument(skip(self, params))]
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let mut matched = {
            let state = self.state.read().await;
            self.evaluate(&state, resource_type, params)?
        };

        let sort = params
            .sort
            .as_ref()
            .and_then(|s| s.first())
            .cloned()
            .unwrap_or_default();
        self.sort_entries(&mut matched, &sort);

        let offset = params.offset.unwrap_or(0) as usize;
        let count = self.config.page_size(params.count);
        Ok(SearchResult::paged(matched, offset, count))
    }

    #[instrument(skip(self, params))]
    async fn find_single(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Key, StorageError> {
        let mut matched = {
            let state = self.state.read().await;
            self.evaluate(&state, resource_type, params)?
        };
        match matched.len() {
            0 => Err(StorageError::not_found(
                resource_type,
                describe_query(params),
            )),
            1 => Ok(matched.swap_remove(0).key),
            n => Err(StorageError::ambiguous(resource_type, n)),
        }
    }

    async fn is_current(&self, key: &Key) -> Result<bool, StorageError> {
        let state = self.state.read().await;
        let Some(current) = state.history.current(key) else {
            return Ok(false);
        };
        Ok(key
            .version_label()
            .is_none_or(|label| label == current.version()))
    }

    async fn count(&self, resource_type: Option<&str>) -> Result<usize, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .currents(resource_type)
            .filter(|e| e.is_present())
            .count())
    }

    async fn resource_types(&self) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state.catalog.types())
    }

    async fn add(&self, entry: NewEntry) -> Result<Entry, StorageError> {
        self.write_one(entry, false).await
    }

    async fn add_batch(&self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StorageError> {
        self.write_batch(entries).await
    }

    async fn replace(&self, entry: NewEntry) -> Result<Entry, StorageError> {
        self.write_one(entry, true).await
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn purge(&self, key: &Key) -> Result<(), StorageError> {
        let _guard = self.locks.acquire(key).await?;
        let mut state = self.state.write().await;

        let logical = key.without_version();
        let removed = state.history.remove(&logical);
        // Still holding the guard, so waiters will retry on a fresh lock.
        self.locks.remove(&logical);
        if removed == 0 {
            return Err(StorageError::not_found(&key.resource_type, &key.id));
        }
        state.catalog.remove(&key.resource_type, &key.id);
        state.search.remove(&logical);
        state.faulted.remove(&logical);

        warn!(
            resource_type = %key.resource_type,
            id = %key.id,
            versions = removed,
            "Purged resource history"
        );
        Ok(())
    }

    async fn clean(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let entries = state.history.entry_count();
        state.clear();
        let locks = self.locks.evict_idle();
        warn!(entries, locks, "Store cleaned; all resources removed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl InMemoryStore {
    /// Number of committed entries across all ids, tombstones included.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.history.entry_count()
    }

    /// Log a one-line summary of the store contents.
    pub async fn log_summary(&self) {
        let state = self.state.read().await;
        info!(
            ids = state.history.id_count(),
            entries = state.history.entry_count(),
            last_sequence = state.last_sequence,
            types = state.catalog.types().len(),
            "In-memory store summary"
        );
    }
}
