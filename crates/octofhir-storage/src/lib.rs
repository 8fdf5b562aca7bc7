//! # octofhir-storage
//!
//! Store abstraction layer for the OctoFHIR versioned resource store.
//!
//! This crate defines the traits and types that every store backend
//! implements. It does not contain a backend; the in-memory one lives in
//! `octofhir-db-memory`.
//!
//! ## Overview
//!
//! The main trait is [`FhirStore`], which defines the contract for:
//! - versioned writes (add, add_batch, replace, delete)
//! - reads (get, get_batch, get_current, exists, list, history)
//! - search (search, find_single)
//! - administration (purge, clean)
//!
//! Every stored version is an immutable [`Entry`] addressed by a [`Key`].
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_storage::{FhirStore, Key, SearchParams, StorageError};
//!
//! async fn patient_by_mrn(store: &dyn FhirStore, mrn: &str) -> Result<Key, StorageError> {
//!     let params = SearchParams::new().with_param("identifier", mrn);
//!     store.find_single("Patient", &params).await
//! }
//! ```

mod error;
pub mod evented;
pub mod key;
mod traits;
mod types;

// Re-export everything from submodules
pub use error::{ErrorCategory, StorageError};
pub use evented::EventedStore;
pub use key::{Key, Version};
pub use traits::{FhirStore, NoopValidator, ResourceValidator};
pub use types::{
    Entry, EntryState, HistoryParams, HistoryScope, NewEntry, SearchParams, SearchResult,
    SortParam,
};

/// Type alias for a store result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn FhirStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::evented::EventedStore;
    pub use crate::key::{Key, Version};
    pub use crate::traits::{FhirStore, NoopValidator, ResourceValidator};
    pub use crate::types::{
        Entry, EntryState, HistoryParams, HistoryScope, NewEntry, SearchParams, SearchResult,
        SortParam,
    };
    pub use crate::{DynStore, StorageResult};
}
