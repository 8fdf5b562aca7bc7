//! EventedStore - A store wrapper that emits change events after commits.
//!
//! This wrapper delegates all operations to an inner store while emitting
//! events to a broadcaster after successful writes.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_storage::EventedStore;
//! use octofhir_core::events::EventBroadcaster;
//!
//! let broadcaster = EventBroadcaster::new_shared();
//! let store = EventedStore::new(memory_store, broadcaster.clone());
//! let mut feed = broadcaster.subscribe();
//!
//! store.add(NewEntry::from_resource(patient_json)?).await?;
//! let event = feed.recv().await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::events::{EventBroadcaster, ResourceEvent, ResourceEventType, StoreEvent};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::StorageError;
use crate::key::Key;
use crate::traits::FhirStore;
use crate::types::{Entry, HistoryParams, HistoryScope, NewEntry, SearchParams, SearchResult};

/// A store wrapper that emits events after successful writes.
///
/// Events are emitted **after** the inner store committed, so every event
/// corresponds to state a reader can already observe. Batches emit nothing
/// until the whole batch committed, then one event per entry in commit order.
pub struct EventedStore<S: FhirStore> {
    inner: S,
    broadcaster: Arc<EventBroadcaster>,
}

impl<S: FhirStore> EventedStore<S> {
    /// Create a new evented store wrapper.
    pub fn new(inner: S, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { inner, broadcaster }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a reference to the broadcaster.
    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    fn emit_entry(&self, entry: &Entry) {
        if !self.broadcaster.has_subscribers() {
            return;
        }
        let event = event_for(entry);
        let event_type = event.event_type;
        let count = self.broadcaster.send_resource(event);
        debug!(
            resource_type = %entry.key.resource_type,
            resource_id = %entry.key.id,
            version = %entry.version(),
            event = %event_type,
            subscribers = count,
            "Emitted resource event"
        );
    }

    fn emit(&self, event: StoreEvent) {
        if !self.broadcaster.has_subscribers() {
            return;
        }
        let count = self.broadcaster.send(event);
        debug!(subscribers = count, "Emitted store event");
    }
}

fn event_for(entry: &Entry) -> ResourceEvent {
    let event_type = if entry.is_deleted() {
        ResourceEventType::Deleted
    } else if entry.version() == "1" {
        ResourceEventType::Created
    } else {
        ResourceEventType::Updated
    };
    ResourceEvent::new(
        event_type,
        entry.key.resource_type.clone(),
        entry.key.id.clone(),
        entry.version(),
        entry.sequence,
        entry.payload.clone(),
        entry.created_at,
    )
}

#[async_trait]
impl<S: FhirStore> FhirStore for EventedStore<S> {
    async fn list(
        &self,
        resource_type: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(resource_type, since).await
    }

    async fn history(
        &self,
        scope: &HistoryScope,
        params: &HistoryParams,
    ) -> Result<Vec<Key>, StorageError> {
        self.inner.history(scope, params).await
    }

    async fn exists(&self, key: &Key) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &Key) -> Result<Entry, StorageError> {
        self.inner.get(key).await
    }

    async fn get_batch(&self, keys: &[Key], sort_by: &str) -> Result<Vec<Entry>, StorageError> {
        self.inner.get_batch(keys, sort_by).await
    }

    async fn get_current(
        &self,
        keys: &[Key],
        sort_by: &str,
    ) -> Result<Vec<Entry>, StorageError> {
        self.inner.get_current(keys, sort_by).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        self.inner.search(resource_type, params).await
    }

    async fn find_single(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Key, StorageError> {
        self.inner.find_single(resource_type, params).await
    }

    async fn is_current(&self, key: &Key) -> Result<bool, StorageError> {
        self.inner.is_current(key).await
    }

    async fn count(&self, resource_type: Option<&str>) -> Result<usize, StorageError> {
        self.inner.count(resource_type).await
    }

    async fn resource_types(&self) -> Result<Vec<String>, StorageError> {
        self.inner.resource_types().await
    }

    async fn add(&self, entry: NewEntry) -> Result<Entry, StorageError> {
        let stored = self.inner.add(entry).await?;
        self.emit_entry(&stored);
        Ok(stored)
    }

    async fn add_batch(&self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StorageError> {
        let stored = self.inner.add_batch(entries).await?;
        for entry in &stored {
            self.emit_entry(entry);
        }
        debug!(count = stored.len(), "Emitted batch events");
        Ok(stored)
    }

    async fn replace(&self, entry: NewEntry) -> Result<Entry, StorageError> {
        let stored = self.inner.replace(entry).await?;
        self.emit_entry(&stored);
        Ok(stored)
    }

    async fn purge(&self, key: &Key) -> Result<(), StorageError> {
        self.inner.purge(key).await?;
        self.emit(StoreEvent::Purged {
            resource_type: key.resource_type.clone(),
            resource_id: key.id.clone(),
        });
        Ok(())
    }

    async fn clean(&self) -> Result<(), StorageError> {
        self.inner.clean().await?;
        self.emit(StoreEvent::Cleaned);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

impl<S: FhirStore> std::fmt::Debug for EventedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventedStore")
            .field("backend", &self.inner.backend_name())
            .field("subscriber_count", &self.broadcaster.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // The wrapper itself is exercised against the in-memory backend in
    // octofhir-db-memory's integration tests.

    use super::*;
    use crate::types::EntryState;
    use serde_json::json;

    fn entry(version: &str, state: EntryState) -> Entry {
        Entry {
            key: Key::versioned("Patient", "p1", version),
            payload: (state == EntryState::Present).then(|| json!({"resourceType": "Patient"})),
            state,
            created_at: OffsetDateTime::UNIX_EPOCH,
            sequence: 9,
        }
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(
            event_for(&entry("1", EntryState::Present)).event_type,
            ResourceEventType::Created
        );
        assert_eq!(
            event_for(&entry("2", EntryState::Present)).event_type,
            ResourceEventType::Updated
        );
        let deleted = event_for(&entry("3", EntryState::Deleted));
        assert_eq!(deleted.event_type, ResourceEventType::Deleted);
        assert!(deleted.resource.is_none());
        assert_eq!(deleted.sequence, 9);
        assert_eq!(deleted.version_id, "3");
    }
}
