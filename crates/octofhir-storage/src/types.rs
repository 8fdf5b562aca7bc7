//! Storage types for the resource store.
//!
//! This module defines all data types used by the store traits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

use octofhir_core::{CoreError, generate_id};

use crate::key::Key;

/// Whether an entry carries a resource or marks its deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    #[default]
    Present,
    Deleted,
}

/// One immutable stored version of a logical resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Always versioned.
    pub key: Key,
    /// The resource content; `None` for tombstones.
    pub payload: Option<Value>,
    pub state: EntryState,
    /// When this version was committed.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Store-wide commit order.
    pub sequence: u64,
}

impl Entry {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.state == EntryState::Present
    }

    /// The version label assigned at commit.
    #[must_use]
    pub fn version(&self) -> &str {
        self.key.version_label().unwrap_or_default()
    }

    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.key.resource_type
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.key.id
    }
}

/// A write request: the key to write under, plus content and state.
///
/// A versioned key is an If-Match expectation on the current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub key: Key,
    pub payload: Option<Value>,
    #[serde(default)]
    pub state: EntryState,
}

impl NewEntry {
    #[must_use]
    pub fn present(key: Key, payload: Value) -> Self {
        Self {
            key,
            payload: Some(payload),
            state: EntryState::Present,
        }
    }

    #[must_use]
    pub fn deleted(key: Key) -> Self {
        Self {
            key,
            payload: None,
            state: EntryState::Deleted,
        }
    }

    /// Build a present entry from a resource's own `resourceType` and `id`.
    ///
    /// A missing `id` is generated and written back into the payload.
    pub fn from_resource(mut resource: Value) -> Result<Self, CoreError> {
        let resource_type = resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::invalid_resource_type("missing resourceType"))?
            .to_string();

        let id = match resource.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                let id = generate_id();
                if let Some(obj) = resource.as_object_mut() {
                    obj.insert("id".to_string(), Value::String(id.clone()));
                }
                id
            }
        };

        Ok(Self::present(Key::new(resource_type, id), resource))
    }

    /// Pin the expected current version.
    #[must_use]
    pub fn if_match(mut self, version: impl Into<String>) -> Self {
        self.key = self.key.with_version(version);
        self
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }
}

/// Which slice of history to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    /// All entries of one type.
    Type(String),
    /// All entries of one logical resource (version ignored).
    Resource(Key),
    /// The global change feed.
    System,
}

/// Parameters for a history query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryParams {
    /// Only include entries created at or after this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    /// Maximum number of entries to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Number of entries to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl HistoryParams {
    /// Creates new default `HistoryParams`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the since parameter.
    #[must_use]
    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    /// Sets the count parameter.
    #[must_use]
    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the offset parameter.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Parameters for a search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    /// Search parameters as key-value pairs.
    /// Multiple values for the same key represent OR conditions.
    pub parameters: HashMap<String, Vec<String>>,
    /// Maximum number of results to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Number of results to skip for pagination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Sort parameters. Only the first one is applied; `_id` breaks ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortParam>>,
}

impl SearchParams {
    /// Creates new empty `SearchParams`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a search parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Sets the count parameter.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the offset parameter.
    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Adds a sort parameter.
    #[must_use]
    pub fn with_sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort
            .get_or_insert_with(Vec::new)
            .push(SortParam::new(field, descending));
        self
    }

    /// Returns true if this search has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// A sort parameter for result ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    /// The field to sort by.
    pub field: String,
    /// Whether to sort in descending order.
    pub descending: bool,
}

impl SortParam {
    /// Creates a new `SortParam`.
    #[must_use]
    pub fn new(field: impl Into<String>, descending: bool) -> Self {
        Self {
            field: field.into(),
            descending,
        }
    }

    /// Creates an ascending sort parameter.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, false)
    }

    /// Creates a descending sort parameter.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, true)
    }

    /// Parses `field` or `-field`. Blank input sorts by `_id`.
    #[must_use]
    pub fn parse(sort_by: &str) -> Self {
        let trimmed = sort_by.trim();
        match trimmed.strip_prefix('-') {
            Some(field) if !field.is_empty() => Self::desc(field),
            Some(_) => Self::desc("_id"),
            None if trimmed.is_empty() => Self::asc("_id"),
            None => Self::asc(trimmed),
        }
    }
}

impl Default for SortParam {
    fn default() -> Self {
        Self::asc("_id")
    }
}

/// Result of a search operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching entries in this page.
    pub entries: Vec<Entry>,
    /// Total number of matches before paging.
    pub total: usize,
    /// Offset this page starts at.
    pub offset: usize,
    /// Page size that was applied.
    pub count: usize,
    /// Whether there are more results available beyond this page.
    pub has_more: bool,
}

impl SearchResult {
    /// Creates a new empty `SearchResult`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cut a page out of the full ordered match list.
    #[must_use]
    pub fn paged(all: Vec<Entry>, offset: usize, count: usize) -> Self {
        let total = all.len();
        let entries: Vec<Entry> = all.into_iter().skip(offset).take(count).collect();
        let has_more = offset + entries.len() < total;
        Self {
            entries,
            total,
            offset,
            count,
            has_more,
        }
    }

    /// Returns the number of entries in this result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of the entries in this page, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }
}
