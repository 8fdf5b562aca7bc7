//! Change-feed events emitted after store commits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Event Broadcaster                              │
//! │              (tokio::sync::broadcast channel)                        │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!    ┌──────────┐        ┌──────────┐        ┌──────────┐
//!    │  Sync    │        │  Cache   │        │  Audit   │
//!    │ consumer │        │ invalid. │        │  trail   │
//!    └──────────┘        └──────────┘        └──────────┘
//! ```
//!
//! Events are published only after a commit is visible to readers, in
//! sequence order. A lagging receiver loses the oldest events; consumers that
//! need every change replay the store history from their last seen sequence.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_core::events::{EventBroadcaster, StoreEvent};
//!
//! let broadcaster = EventBroadcaster::new_shared();
//! let mut rx = broadcaster.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(StoreEvent::Resource(event)) = rx.recv().await {
//!         println!("{} {}/{}", event.event_type, event.resource_type, event.resource_id);
//!     }
//! });
//! ```

pub mod broadcaster;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use types::{ResourceEvent, ResourceEventType, StoreEvent};
