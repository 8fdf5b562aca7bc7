//! In-memory versioned resource store for OctoFHIR.
//!
//! This crate provides an in-memory implementation of the `FhirStore` trait
//! from `octofhir-storage`: append-only per-id history, a per-type catalog
//! and a search index, all updated in one commit section. Per-id write locks
//! live in a papaya lock-free map.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_memory::InMemoryStore;
//! use octofhir_storage::{FhirStore, Key, NewEntry, SearchParams};
//!
//! let store = InMemoryStore::new();
//!
//! let patient = serde_json::json!({
//!     "resourceType": "Patient",
//!     "identifier": [{"value": "123"}],
//!     "name": [{"family": "Smith"}]
//! });
//! store.add(NewEntry::present(Key::new("Patient", "p1"), patient)).await?;
//!
//! let key = store
//!     .find_single("Patient", &SearchParams::new().with_param("identifier", "123"))
//!     .await?;
//! ```

pub mod catalog;
pub mod factory;
mod fhir_impl;
pub mod history;
pub mod locks;
pub mod params;
pub mod query;
pub mod search_index;
pub mod storage;

// Re-export the store trait for convenience
pub use octofhir_storage::{DynStore, FhirStore, Key, NewEntry, StorageError};

pub use factory::{
    ConfigError, StoreConfig, create_evented_store, create_store, load_config,
};
pub use params::{ParamKind, ResourceDescriptor, SearchParameterDef, SearchParameterRegistry};
pub use search_index::IndexValue;
pub use storage::{InMemoryStore, InMemoryStoreBuilder};
