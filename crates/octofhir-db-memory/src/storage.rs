use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::try_join_all;
use octofhir_core::id::{validate_id, validate_resource_type};
use octofhir_core::{SharedClock, SystemClock};
use octofhir_storage::{
    Entry, EntryState, Key, NewEntry, NoopValidator, ResourceValidator, SearchParams, SortParam,
    StorageError,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::TypeCatalog;
use crate::factory::StoreConfig;
use crate::history::HistoryIndex;
use crate::locks::LockTable;
use crate::params::{PARAM_ID, PARAM_LAST_UPDATED, SearchParameterRegistry, instant_value};
use crate::query::{Predicate, parse_predicate};
use crate::search_index::{IndexValue, SearchIndex};

/// Everything a commit touches. Guarded by one `RwLock` so readers never
/// observe a history append without its catalog and index updates.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) history: HistoryIndex,
    pub(crate) catalog: TypeCatalog,
    pub(crate) search: SearchIndex,
    pub(crate) last_sequence: u64,
    /// Ids whose last write hit an invariant violation.
    pub(crate) faulted: HashSet<Key>,
}

impl StoreState {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A write that passed structural checks and validation, with its index
/// values extracted.
#[derive(Debug)]
pub(crate) struct PreparedWrite {
    pub(crate) entry: NewEntry,
    pub(crate) index_values: Vec<(String, IndexValue)>,
}

/// In-memory versioned resource store.
///
/// This store provides:
/// - Append-only history per logical id with a store-wide sequence
/// - Soft deletion through tombstone versions
/// - A per-type catalog for listing
/// - An inverted search index over current, present entries
/// - Per-id write serialization with a bounded wait
/// - All-or-nothing batch ingestion
pub struct InMemoryStore {
    pub(crate) state: RwLock<StoreState>,
    pub(crate) locks: LockTable,
    pub(crate) registry: Arc<SearchParameterRegistry>,
    validator: Arc<dyn ResourceValidator>,
    clock: SharedClock,
    pub(crate) config: StoreConfig,
}

impl InMemoryStore {
    /// Creates a store with default configuration, the default parameter
    /// registry and no external validator.
    pub fn new() -> Self {
        Self::builder()
            .registry(SearchParameterRegistry::with_defaults())
            .build()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &SearchParameterRegistry {
        &self.registry
    }

    /// Whether writes to `key`'s id are blocked after an invariant violation.
    pub async fn is_faulted(&self, key: &Key) -> bool {
        self.state.read().await.faulted.contains(key)
    }

    /// Re-enable writes to a faulted id. Returns whether it was faulted.
    pub async fn clear_fault(&self, key: &Key) -> bool {
        let cleared = self.state.write().await.faulted.remove(key);
        if cleared {
            info!(resource_type = %key.resource_type, id = %key.id, "Cleared write fault");
        }
        cleared
    }

    // ==================== Write pipeline ====================

    /// Checks that need no store state.
    pub(crate) fn check_structure(&self, entry: &NewEntry) -> Result<(), StorageError> {
        let key = &entry.key;
        validate_resource_type(&key.resource_type)?;
        validate_id(&key.id)?;

        if self.config.registry.strict_types && !self.registry.is_registered(&key.resource_type) {
            return Err(StorageError::validation(format!(
                "Resource type '{}' is not registered",
                key.resource_type
            )));
        }

        if key.version_label().is_some_and(str::is_empty) {
            return Err(StorageError::validation(format!(
                "Empty expected version on {}",
                key.logical()
            )));
        }

        match (&entry.state, &entry.payload) {
            (EntryState::Present, None) => {
                return Err(StorageError::validation(format!(
                    "Present entry for {} has no payload",
                    key.logical()
                )));
            }
            (_, Some(payload)) => check_payload(key, payload)?,
            (EntryState::Deleted, None) => {}
        }
        Ok(())
    }

    /// Structural checks, then the external validator, then index extraction.
    /// Runs before any lock is taken.
    pub(crate) async fn prepare(&self, entry: NewEntry) -> Result<PreparedWrite, StorageError> {
        self.check_structure(&entry)?;
        self.validator.validate(&entry).await?;
        let index_values = match (&entry.state, &entry.payload) {
            (EntryState::Present, Some(payload)) => {
                self.registry
                    .index_values(&entry.key.resource_type, &entry.key.id, payload)
            }
            _ => Vec::new(),
        };
        Ok(PreparedWrite {
            entry,
            index_values,
        })
    }

    /// Prepare a whole batch; the first failure wins and nothing is kept.
    pub(crate) async fn prepare_all(
        &self,
        entries: Vec<NewEntry>,
    ) -> Result<Vec<PreparedWrite>, StorageError> {
        for entry in &entries {
            self.check_structure(entry)?;
        }
        try_join_all(entries.into_iter().map(|entry| self.prepare(entry))).await
    }

    /// Decide the version a write gets, honoring an If-Match expectation.
    ///
    /// `planned` holds versions already handed out earlier in the same batch.
    pub(crate) fn plan_version(
        state: &StoreState,
        planned: &HashMap<Key, u64>,
        entry: &NewEntry,
        must_exist: bool,
    ) -> Result<u64, StorageError> {
        let key = &entry.key;
        if state.faulted.contains(key) {
            return Err(StorageError::internal(format!(
                "{} is faulted; writes are blocked until the fault is cleared",
                key.logical()
            )));
        }

        let current: Option<u64> = match planned.get(key) {
            Some(v) => Some(*v),
            None => state
                .history
                .current(key)
                .map(|_| state.history.next_version(key) - 1),
        };

        if must_exist && current.is_none() {
            return Err(StorageError::not_found(&key.resource_type, &key.id));
        }

        if let Some(expected) = key.version_label() {
            match current {
                None => {
                    return Err(StorageError::conflict(format!(
                        "expected version {expected} of {}, but it does not exist",
                        key.logical()
                    )));
                }
                Some(actual) if actual.to_string() != expected => {
                    warn!(
                        resource_type = %key.resource_type,
                        id = %key.id,
                        expected,
                        actual,
                        "Version expectation not met"
                    );
                    return Err(StorageError::version_conflict(expected, actual));
                }
                Some(_) => {}
            }
        }

        Ok(current.unwrap_or(0) + 1)
    }

    fn record_fault(
        state: &mut StoreState,
        key: &Key,
        version: u64,
        sequence: u64,
        err: StorageError,
    ) -> StorageError {
        error!(
            resource_type = %key.resource_type,
            id = %key.id,
            version,
            sequence,
            error = %err,
            "History invariant violated; blocking writes to this id"
        );
        state.faulted.insert(key.without_version());
        err
    }

    /// Assign sequence and timestamp, then update history, catalog and index.
    ///
    /// Caller holds the per-id lock and the state write lock.
    pub(crate) fn apply(
        &self,
        state: &mut StoreState,
        prepared: PreparedWrite,
        version: u64,
    ) -> Result<Entry, StorageError> {
        let PreparedWrite {
            entry,
            mut index_values,
        } = prepared;
        let created_at = self.clock.now();
        let sequence = state.last_sequence + 1;
        let key = entry.key.with_version(version.to_string());

        let stored = Entry {
            key: key.clone(),
            payload: entry.payload,
            state: entry.state,
            created_at,
            sequence,
        };

        let stored = match state.history.append(stored) {
            Ok(stored) => stored,
            Err(err) => return Err(Self::record_fault(state, &key, version, sequence, err)),
        };

        state.last_sequence = sequence;
        state
            .catalog
            .touch(&key.resource_type, &key.id, created_at);
        if stored.is_present() {
            index_values.push((PARAM_LAST_UPDATED.to_string(), instant_value(created_at)));
            state.search.update(&key, index_values);
        } else {
            state.search.remove(&key);
        }

        debug!(
            resource_type = %key.resource_type,
            id = %key.id,
            version,
            sequence,
            deleted = stored.is_deleted(),
            "Committed entry"
        );
        Ok((*stored).clone())
    }

    #[instrument(skip(self, entry), fields(resource_type = %entry.key.resource_type, id = %entry.key.id))]
    pub(crate) async fn write_one(
        &self,
        entry: NewEntry,
        must_exist: bool,
    ) -> Result<Entry, StorageError> {
        let prepared = self.prepare(entry).await?;
        let _guard = self.locks.acquire(&prepared.entry.key).await?;
        let mut state = self.state.write().await;
        let version = Self::plan_version(&state, &HashMap::new(), &prepared.entry, must_exist)?;
        self.apply(&mut state, prepared, version)
    }

    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub(crate) async fn write_batch(&self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StorageError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = self.prepare_all(entries).await?;

        let keys: Vec<Key> = prepared.iter().map(|p| p.entry.key.clone()).collect();
        let _guards = self.locks.acquire_all(&keys).await?;
        let mut state = self.state.write().await;

        // Plan everything before touching state so a failure leaves no trace.
        let mut planned: HashMap<Key, u64> = HashMap::new();
        let mut versions = Vec::with_capacity(prepared.len());
        for write in &prepared {
            let version = Self::plan_version(&state, &planned, &write.entry, false)?;
            planned.insert(write.entry.key.without_version(), version);
            versions.push(version);
        }
        for (offset, (write, &version)) in prepared.iter().zip(&versions).enumerate() {
            let sequence = state.last_sequence + 1 + offset as u64;
            let key = &write.entry.key;
            if let Err(err) = state.history.check_append(key, version, sequence) {
                return Err(Self::record_fault(&mut state, key, version, sequence, err));
            }
        }

        let mut stored = Vec::with_capacity(prepared.len());
        for (write, version) in prepared.into_iter().zip(versions) {
            stored.push(self.apply(&mut state, write, version)?);
        }
        debug!(count = stored.len(), "Committed batch");
        Ok(stored)
    }

    // ==================== Read helpers ====================

    /// Current, present entries of `resource_type` matching every parameter.
    pub(crate) fn evaluate(
        &self,
        state: &StoreState,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Vec<Entry>, StorageError> {
        if self.config.registry.strict_types && !self.registry.is_registered(resource_type) {
            return Err(StorageError::validation(format!(
                "Resource type '{resource_type}' is not registered"
            )));
        }

        // Parse every value first so a bad one fails even if an earlier
        // parameter already matched nothing.
        let mut names: Vec<&String> = params.parameters.keys().collect();
        names.sort();
        let mut parsed: Vec<(&str, Vec<Predicate>)> = Vec::with_capacity(names.len());
        for name in names {
            let kind = self.registry.kind_of(resource_type, name).ok_or_else(|| {
                StorageError::validation(format!(
                    "Unknown search parameter '{name}' for {resource_type}"
                ))
            })?;
            let mut predicates = Vec::new();
            for raw in &params.parameters[name] {
                for part in raw.split(',') {
                    predicates.push(parse_predicate(name, kind, part)?);
                }
            }
            if predicates.is_empty() {
                return Err(StorageError::validation(format!(
                    "Search parameter '{name}' has no value"
                )));
            }
            parsed.push((name.as_str(), predicates));
        }

        let mut matched: Option<BTreeSet<String>> = None;
        for (name, predicates) in &parsed {
            let mut ids = BTreeSet::new();
            for predicate in predicates {
                ids.extend(state.search.lookup(resource_type, name, predicate));
            }
            let next = match matched {
                None => ids,
                Some(prev) => prev.intersection(&ids).cloned().collect(),
            };
            let done = next.is_empty();
            matched = Some(next);
            if done {
                break;
            }
        }

        let entries = match matched {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| state.history.current(&Key::new(resource_type, id)))
                .filter(|e| e.is_present())
                .map(|e| (**e).clone())
                .collect(),
            None => state
                .history
                .currents(Some(resource_type))
                .filter(|e| e.is_present())
                .map(|e| (**e).clone())
                .collect(),
        };
        Ok(entries)
    }

    /// Order entries by `sort`. Ties break on type, id, then sequence.
    pub(crate) fn sort_entries(&self, entries: &mut [Entry], sort: &SortParam) {
        let by_key = |a: &Entry, b: &Entry| a.key.cmp(&b.key).then(a.sequence.cmp(&b.sequence));

        let field = sort.field.as_str();
        let declared = entries.iter().any(|e| {
            self.registry
                .descriptor(e.resource_type())
                .is_some_and(|d| d.param(field).is_some())
        });
        if field == PARAM_ID || (!declared && !matches!(field, PARAM_LAST_UPDATED | "_sequence")) {
            entries.sort_by(|a, b| {
                let ord = by_key(a, b);
                if sort.descending { ord.reverse() } else { ord }
            });
            return;
        }

        let sort_value = |e: &Entry| -> Option<IndexValue> {
            match field {
                PARAM_LAST_UPDATED => Some(instant_value(e.created_at)),
                "_sequence" => Some(IndexValue::Number(e.sequence as f64)),
                _ => {
                    let def = self.registry.descriptor(e.resource_type())?.param(field)?;
                    def.extract(e.resource_type(), e.payload.as_ref()?)
                        .into_iter()
                        .min()
                }
            }
        };

        let mut decorated: Vec<(Option<IndexValue>, Entry)> = entries
            .iter()
            .map(|e| (sort_value(e), e.clone()))
            .collect();
        decorated.sort_by(|(va, a), (vb, b)| {
            let primary = match (va, vb) {
                (Some(x), Some(y)) if sort.descending => y.cmp(x),
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            primary.then_with(|| by_key(a, b))
        });
        for (slot, (_, entry)) in entries.iter_mut().zip(decorated) {
            *slot = entry;
        }
    }
}

fn check_payload(key: &Key, payload: &Value) -> Result<(), StorageError> {
    let Some(obj) = payload.as_object() else {
        return Err(StorageError::validation(format!(
            "Payload for {} must be a JSON object",
            key.logical()
        )));
    };
    if let Some(rt) = obj.get("resourceType") {
        if rt.as_str() != Some(key.resource_type.as_str()) {
            return Err(StorageError::validation(format!(
                "Payload resourceType {rt} does not match key {}",
                key.logical()
            )));
        }
    }
    if let Some(id) = obj.get("id") {
        if id.as_str() != Some(key.id.as_str()) {
            return Err(StorageError::validation(format!(
                "Payload id {id} does not match key {}",
                key.logical()
            )));
        }
    }
    Ok(())
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

/// Assembles an [`InMemoryStore`] from injected collaborators.
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    registry: Option<SearchParameterRegistry>,
    validator: Option<Arc<dyn ResourceValidator>>,
    clock: Option<SharedClock>,
    config: Option<StoreConfig>,
}

impl InMemoryStoreBuilder {
    #[must_use]
    pub fn registry(mut self, registry: SearchParameterRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ResourceValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Unset collaborators default to an empty registry, a validator that
    /// accepts everything, the system clock and default configuration.
    pub fn build(self) -> InMemoryStore {
        let config = self.config.unwrap_or_default();
        InMemoryStore {
            state: RwLock::new(StoreState::default()),
            locks: LockTable::new(config.lock_timeout()),
            registry: Arc::new(self.registry.unwrap_or_default()),
            validator: self.validator.unwrap_or_else(|| Arc::new(NoopValidator)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config,
        }
    }
}
