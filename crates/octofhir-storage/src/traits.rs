//! Store traits.
//!
//! This module defines the contract every store backend implements, and the
//! validation seam that write paths call before touching any state.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::key::Key;
use crate::types::{Entry, HistoryParams, HistoryScope, NewEntry, SearchParams, SearchResult};

/// The main trait every versioned store implements.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is meant
/// to be shared across tasks behind an `Arc`.
///
/// # Example
///
/// ```ignore
/// use octofhir_storage::{FhirStore, Key, NewEntry, StorageError};
///
/// async fn rename(store: &dyn FhirStore, id: &str) -> Result<(), StorageError> {
///     let current = store.get(&Key::new("Patient", id)).await?;
///     let mut payload = current.payload.unwrap_or_default();
///     payload["name"] = serde_json::json!([{"family": "Renamed"}]);
///     store
///         .replace(NewEntry::present(current.key.clone(), payload))
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FhirStore: Send + Sync {
    // ==================== Reads ====================

    /// Logical ids of `resource_type` modified at or after `since`.
    ///
    /// Ordered by last modification, then id. Ids whose current version is a
    /// tombstone are included.
    async fn list(
        &self,
        resource_type: &str,
        since: Option<OffsetDateTime>,
    ) -> Result<Vec<String>, StorageError>;

    /// Versioned keys of every entry in `scope`, in commit order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for a resource scope naming an id that
    /// was never stored.
    async fn history(
        &self,
        scope: &HistoryScope,
        params: &HistoryParams,
    ) -> Result<Vec<Key>, StorageError>;

    /// Whether the current (unversioned key) or exact version exists.
    /// Tombstones count.
    async fn exists(&self, key: &Key) -> Result<bool, StorageError>;

    /// The current entry or one exact version, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the id or version was never stored.
    async fn get(&self, key: &Key) -> Result<Entry, StorageError>;

    /// Resolve each key; unknown keys are skipped. Ordered by `sort_by`.
    async fn get_batch(&self, keys: &[Key], sort_by: &str) -> Result<Vec<Entry>, StorageError>;

    /// Current, non-deleted entries for the given ids. Ordered by `sort_by`.
    async fn get_current(&self, keys: &[Key], sort_by: &str)
    -> Result<Vec<Entry>, StorageError>;

    /// Searches current, non-deleted entries of one type.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Validation` for unknown parameters, prefixes or
    /// unparseable values.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    /// The current key of the only match.
    ///
    /// # Errors
    ///
    /// `NotFound` on zero matches, `AmbiguousMatch` on more than one.
    async fn find_single(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Key, StorageError>;

    /// Whether `key` names the current version of its id.
    async fn is_current(&self, key: &Key) -> Result<bool, StorageError>;

    /// Number of ids whose current entry is present, optionally per type.
    async fn count(&self, resource_type: Option<&str>) -> Result<usize, StorageError>;

    /// Every type that has at least one stored id.
    async fn resource_types(&self) -> Result<Vec<String>, StorageError>;

    // ==================== Writes ====================

    /// Stores a new version of a new or existing id.
    ///
    /// # Errors
    ///
    /// `Validation` for rejected input, `Conflict` if the key's version does
    /// not match the current one or the id stays locked past the budget.
    async fn add(&self, entry: NewEntry) -> Result<Entry, StorageError>;

    /// Stores all entries or none of them.
    async fn add_batch(&self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StorageError>;

    /// Stores a new version of an existing id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the id was never stored, plus
    /// everything [`FhirStore::add`] returns.
    async fn replace(&self, entry: NewEntry) -> Result<Entry, StorageError>;

    /// Soft delete: stores a tombstone version.
    async fn delete(&self, key: &Key) -> Result<Entry, StorageError> {
        self.replace(NewEntry::deleted(key.clone())).await
    }

    /// Removes every version of one id.
    async fn purge(&self, key: &Key) -> Result<(), StorageError>;

    /// Drops all stored state.
    async fn clean(&self) -> Result<(), StorageError>;

    // ==================== Metadata ====================

    /// Returns the name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Checks an incoming entry before the store takes any lock.
///
/// Validators see the write request only; they must not consult store state.
#[async_trait]
pub trait ResourceValidator: Send + Sync {
    async fn validate(&self, entry: &NewEntry) -> Result<(), StorageError>;
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

#[async_trait]
impl ResourceValidator for NoopValidator {
    async fn validate(&self, _entry: &NewEntry) -> Result<(), StorageError> {
        Ok(())
    }
}
