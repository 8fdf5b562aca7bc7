//! End-to-end behavior of the in-memory store through the `FhirStore` trait.
//!
//! Run with: cargo test -p octofhir-db-memory --test store_scenarios

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_core::ManualClock;
use octofhir_db_memory::{InMemoryStore, SearchParameterRegistry, StoreConfig};
use octofhir_storage::{
    EntryState, FhirStore, HistoryParams, HistoryScope, Key, NewEntry, ResourceValidator,
    SearchParams, StorageError,
};
use serde_json::{Value, json};
use time::macros::datetime;
use tokio::task::JoinSet;

fn patient_json(id: &str, family: &str, identifier: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "identifier": [{"system": "urn:mrn", "value": identifier}],
        "name": [{"family": family, "given": ["Alex"]}]
    })
}

fn patient(id: &str, family: &str, identifier: &str) -> NewEntry {
    NewEntry::present(
        Key::new("Patient", id),
        patient_json(id, family, identifier),
    )
}

fn store() -> InMemoryStore {
    octofhir_core::observability::init_test_tracing();
    InMemoryStore::new()
}

#[tokio::test]
async fn patient_lifecycle() {
    let store = store();
    let key = Key::new("Patient", "p1");

    let created = store.add(patient("p1", "Smith", "123")).await.unwrap();
    assert_eq!(created.key, key);
    assert_eq!(created.version(), "1");
    assert!(store.exists(&key).await.unwrap());

    let by_identifier = SearchParams::new().with_param("identifier", "123");
    let result = store.search("Patient", &by_identifier).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.entries[0].key.id, "p1");

    let updated = store
        .replace(patient("p1", "Jones", "123"))
        .await
        .unwrap();
    assert_eq!(updated.version(), "2");
    assert!(updated.sequence > created.sequence);

    let smith = SearchParams::new().with_param("family", "smith");
    assert!(store.search("Patient", &smith).await.unwrap().is_empty());
    let jones = SearchParams::new().with_param("family", "JON");
    assert_eq!(store.search("Patient", &jones).await.unwrap().total, 1);

    // The old version is still readable by exact key.
    let v1 = store.get(&key.with_version("1")).await.unwrap();
    assert_eq!(v1.payload.unwrap()["name"][0]["family"], "Smith");

    let tombstone = store.delete(&key).await.unwrap();
    assert_eq!(tombstone.version(), "3");
    assert_eq!(tombstone.state, EntryState::Deleted);

    assert!(store.search("Patient", &by_identifier).await.unwrap().is_empty());
    assert!(store.get(&key).await.unwrap().is_deleted());
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(store.count(Some("Patient")).await.unwrap(), 0);
    assert_eq!(store.list("Patient", None).await.unwrap(), vec!["p1"]);

    let history = store
        .history(&HistoryScope::Resource(key.clone()), &HistoryParams::new())
        .await
        .unwrap();
    let versions: Vec<_> = history.iter().filter_map(|k| k.version_label()).collect();
    assert_eq!(versions, ["1", "2", "3"]);
}

#[tokio::test]
async fn replace_requires_existing_id() {
    let store = store();
    let err = store
        .replace(patient("ghost", "Smith", "1"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store.delete(&Key::new("Patient", "ghost")).await.unwrap_err().is_not_found());
    assert_eq!(store.history(&HistoryScope::System, &HistoryParams::new()).await.unwrap().len(), 0);
}

#[tokio::test]
async fn find_single_reports_ambiguity_and_absence() {
    let store = store();
    store.add(patient("a", "Smith", "123")).await.unwrap();
    store.add(patient("b", "Brown", "123")).await.unwrap();
    store.add(patient("c", "Green", "456")).await.unwrap();

    let shared = SearchParams::new().with_param("identifier", "123");
    let err = store.find_single("Patient", &shared).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::AmbiguousMatch { count: 2, .. }
    ));
    assert_eq!(err.status_code(), 412);

    let unique = SearchParams::new().with_param("identifier", "urn:mrn|456");
    let key = store.find_single("Patient", &unique).await.unwrap();
    assert_eq!(key, Key::new("Patient", "c"));
    assert_eq!(key.version_label(), Some("1"));

    let missing = SearchParams::new().with_param("identifier", "999");
    match store.find_single("Patient", &missing).await.unwrap_err() {
        StorageError::NotFound { resource_type, id, .. } => {
            assert_eq!(resource_type, "Patient");
            assert_eq!(id, "?identifier=999");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    // Narrowing by a second parameter resolves the ambiguity.
    let narrowed = shared.with_param("family", "brown");
    assert_eq!(
        store.find_single("Patient", &narrowed).await.unwrap().id,
        "b"
    );
}

#[tokio::test]
async fn list_since_is_inclusive_and_ordered_by_modification() {
    let clock = ManualClock::shared(datetime!(2024-01-01 00:00:00 UTC));
    let store = InMemoryStore::builder()
        .registry(SearchParameterRegistry::with_defaults())
        .clock(clock.clone())
        .build();

    store.add(patient("a", "A", "1")).await.unwrap();
    clock.advance(time::Duration::hours(1));
    let t1 = datetime!(2024-01-01 01:00:00 UTC);
    store.add(patient("b", "B", "2")).await.unwrap();
    clock.advance(time::Duration::hours(1));
    store.add(patient("a", "A2", "1")).await.unwrap();

    assert_eq!(store.list("Patient", None).await.unwrap(), vec!["b", "a"]);
    assert_eq!(store.list("Patient", Some(t1)).await.unwrap(), vec!["b", "a"]);
    let later = datetime!(2024-01-01 01:30:00 UTC);
    assert_eq!(store.list("Patient", Some(later)).await.unwrap(), vec!["a"]);
    assert!(store.list("Observation", None).await.unwrap().is_empty());

    let since_t1 = store
        .history(&HistoryScope::Type("Patient".into()), &HistoryParams::new().since(t1))
        .await
        .unwrap();
    assert_eq!(since_t1.len(), 2);
    assert_eq!(since_t1[0].id, "b");
}

#[tokio::test]
async fn list_since_excludes_ids_modified_before_the_cutoff() {
    let cutoff = datetime!(2024-06-01 12:00:00 UTC);
    let clock = ManualClock::shared(cutoff - time::Duration::seconds(1));
    let store = InMemoryStore::builder()
        .registry(SearchParameterRegistry::with_defaults())
        .clock(clock.clone())
        .build();

    store.add(patient("before", "A", "1")).await.unwrap();
    clock.advance(time::Duration::seconds(1));
    store.add(patient("at", "B", "2")).await.unwrap();
    clock.advance(time::Duration::seconds(1));
    store.add(patient("after", "C", "3")).await.unwrap();

    assert_eq!(
        store.list("Patient", Some(cutoff)).await.unwrap(),
        vec!["at", "after"]
    );
    assert_eq!(
        store.list("Patient", None).await.unwrap(),
        vec!["before", "at", "after"]
    );
}

#[tokio::test]
async fn imported_tombstone_starts_a_history() {
    let store = store();
    let key = Key::new("Patient", "imported");

    let stored = store.add(NewEntry::deleted(key.clone())).await.unwrap();
    assert_eq!(stored.version(), "1");
    assert!(stored.is_deleted());
    assert!(stored.payload.is_none());

    assert!(store.exists(&key).await.unwrap());
    let fetched = store.get(&key).await.unwrap();
    assert!(fetched.is_deleted());
    assert_eq!(fetched.sequence, stored.sequence);

    assert_eq!(store.count(Some("Patient")).await.unwrap(), 0);
    assert_eq!(store.list("Patient", None).await.unwrap(), vec!["imported"]);
    assert!(store.search("Patient", &SearchParams::new()).await.unwrap().is_empty());
    assert!(store.get_current(&[key.clone()], "_id").await.unwrap().is_empty());

    let history = store
        .history(&HistoryScope::Resource(key.clone()), &HistoryParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version_label(), Some("1"));

    // A later write revives it as the next version.
    let revived = store.add(patient("imported", "Back", "9")).await.unwrap();
    assert_eq!(revived.version(), "2");
    assert_eq!(store.count(Some("Patient")).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_one_id_get_distinct_versions() {
    let store = Arc::new(store());
    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .add(patient("shared", &format!("Name{i}"), "1"))
                .await
                .unwrap()
        });
    }

    let mut versions = Vec::new();
    while let Some(result) = tasks.join_next().await {
        versions.push(result.unwrap().version().parse::<u32>().unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=32).collect::<Vec<_>>());

    let history = store
        .history(
            &HistoryScope::Resource(Key::new("Patient", "shared")),
            &HistoryParams::new(),
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 32);
    assert_eq!(store.count(None).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_distinct_ids_keep_sequences_unique() {
    let store = Arc::new(store());
    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .add(patient(&format!("p{i}"), "Same", &i.to_string()))
                .await
                .unwrap()
                .sequence
        });
    }

    let mut sequences = Vec::new();
    while let Some(result) = tasks.join_next().await {
        sequences.push(result.unwrap());
    }
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 50);

    let same = SearchParams::new().with_param("family", "same").with_count(100);
    assert_eq!(store.search("Patient", &same).await.unwrap().total, 50);
}

#[tokio::test]
async fn batch_with_one_invalid_entry_stores_nothing() {
    let store = store();
    let mut batch: Vec<NewEntry> = (0..10)
        .map(|i| patient(&format!("p{i}"), "Batch", &i.to_string()))
        .collect();
    batch[7] = NewEntry::present(
        Key::new("Patient", "p7"),
        json!({"resourceType": "Observation", "id": "p7"}),
    );

    let err = store.add_batch(batch).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(store.count(None).await.unwrap(), 0);
    assert!(store.list("Patient", None).await.unwrap().is_empty());
    assert!(
        store
            .history(&HistoryScope::System, &HistoryParams::new())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn batch_version_conflict_stores_nothing() {
    let store = store();
    store.add(patient("existing", "Old", "1")).await.unwrap();

    let batch = vec![
        patient("fresh", "New", "2"),
        patient("existing", "Newer", "1").if_match("5"),
    ];
    assert!(store.add_batch(batch).await.unwrap_err().is_conflict());
    assert!(!store.exists(&Key::new("Patient", "fresh")).await.unwrap());
    assert_eq!(
        store.get(&Key::new("Patient", "existing")).await.unwrap().version(),
        "1"
    );
}

#[tokio::test]
async fn batch_assigns_consecutive_versions_in_order() {
    let store = store();
    let stored = store
        .add_batch(vec![
            patient("b", "First", "1"),
            patient("a", "Other", "2"),
            patient("b", "Second", "1"),
        ])
        .await
        .unwrap();

    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].version(), "1");
    assert_eq!(stored[2].version(), "2");
    assert!(stored.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let current = store.get(&Key::new("Patient", "b")).await.unwrap();
    assert_eq!(current.payload.unwrap()["name"][0]["family"], "Second");
    assert!(store.add_batch(Vec::new()).await.unwrap().is_empty());
}

struct RejectId(&'static str);

#[async_trait]
impl ResourceValidator for RejectId {
    async fn validate(&self, entry: &NewEntry) -> Result<(), StorageError> {
        if entry.key.id == self.0 {
            return Err(StorageError::validation(format!("{} is blocked", entry.key)));
        }
        Ok(())
    }
}

#[tokio::test]
async fn external_validator_runs_before_any_write() {
    let store = InMemoryStore::builder()
        .registry(SearchParameterRegistry::with_defaults())
        .validator(Arc::new(RejectId("blocked")))
        .build();

    assert!(store.add(patient("ok", "Fine", "1")).await.is_ok());
    assert!(
        store
            .add(patient("blocked", "Nope", "2"))
            .await
            .unwrap_err()
            .is_validation()
    );

    let batch = vec![patient("x", "X", "3"), patient("blocked", "Nope", "2")];
    assert!(store.add_batch(batch).await.is_err());
    assert!(!store.exists(&Key::new("Patient", "x")).await.unwrap());
}

#[tokio::test]
async fn exists_and_get_are_idempotent() {
    let store = store();
    store.add(patient("p1", "Smith", "1")).await.unwrap();
    let key = Key::new("Patient", "p1");

    for _ in 0..3 {
        assert!(store.exists(&key).await.unwrap());
        assert!(store.exists(&key.with_version("1")).await.unwrap());
        assert!(!store.exists(&key.with_version("2")).await.unwrap());
        assert!(!store.exists(&Key::new("Patient", "p2")).await.unwrap());
    }
    let first = store.get(&key).await.unwrap();
    let second = store.get(&key).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.history(&HistoryScope::System, &HistoryParams::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stored_payload_round_trips() {
    let store = store();
    let payload = json!({
        "resourceType": "Observation",
        "id": "o1",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
        "valueQuantity": {"value": 72.5, "unit": "beats/min"},
        "extension": [{"url": "urn:x", "valueString": "kept as-is"}]
    });
    let stored = store
        .add(NewEntry::present(Key::new("Observation", "o1"), payload.clone()))
        .await
        .unwrap();

    let fetched = store.get(&stored.key).await.unwrap();
    assert_eq!(fetched.payload, Some(payload));
    assert_eq!(fetched.key.version_label(), Some("1"));

    let encoded = serde_json::to_string(&fetched).unwrap();
    let decoded: octofhir_storage::Entry = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, fetched);
}

#[tokio::test]
async fn history_scopes_and_paging() {
    let store = store();
    store.add(patient("p1", "A", "1")).await.unwrap();
    store
        .add(NewEntry::present(
            Key::new("Observation", "o1"),
            json!({"resourceType": "Observation", "status": "final"}),
        ))
        .await
        .unwrap();
    store.add(patient("p1", "B", "1")).await.unwrap();
    store.add(patient("p2", "C", "2")).await.unwrap();

    let system = store
        .history(&HistoryScope::System, &HistoryParams::new())
        .await
        .unwrap();
    let labels: Vec<String> = system.iter().map(ToString::to_string).collect();
    assert_eq!(
        labels,
        [
            "Patient/p1/_history/1",
            "Observation/o1/_history/1",
            "Patient/p1/_history/2",
            "Patient/p2/_history/1",
        ]
    );

    let patients = store
        .history(&HistoryScope::Type("Patient".into()), &HistoryParams::new())
        .await
        .unwrap();
    assert_eq!(patients.len(), 3);

    let page = store
        .history(&HistoryScope::System, &HistoryParams::new().offset(1).count(2))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].resource_type, "Observation");

    let err = store
        .history(
            &HistoryScope::Resource(Key::new("Patient", "nobody")),
            &HistoryParams::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn purge_and_clean() {
    let store = store();
    store.add(patient("p1", "Smith", "1")).await.unwrap();
    store.add(patient("p1", "Smith", "1")).await.unwrap();
    store.add(patient("p2", "Smith", "2")).await.unwrap();

    let key = Key::new("Patient", "p1");
    store.purge(&key).await.unwrap();
    assert!(!store.exists(&key).await.unwrap());
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert_eq!(store.list("Patient", None).await.unwrap(), vec!["p2"]);
    let smith = SearchParams::new().with_param("family", "smith");
    assert_eq!(store.search("Patient", &smith).await.unwrap().total, 1);

    // A purged id starts over.
    assert_eq!(store.add(patient("p1", "Smith", "1")).await.unwrap().version(), "1");

    store.clean().await.unwrap();
    assert_eq!(store.count(None).await.unwrap(), 0);
    assert!(store.resource_types().await.unwrap().is_empty());
    assert!(store.search("Patient", &smith).await.unwrap().is_empty());
}

#[tokio::test]
async fn strict_types_rejects_unregistered_types() {
    let mut config = StoreConfig::default();
    config.registry.strict_types = true;
    let store = InMemoryStore::builder()
        .registry(SearchParameterRegistry::with_defaults())
        .config(config)
        .build();

    let basic = NewEntry::present(Key::new("Basic", "b1"), json!({"resourceType": "Basic"}));
    assert!(store.add(basic).await.unwrap_err().is_validation());
    assert!(
        store
            .search("Basic", &SearchParams::new())
            .await
            .unwrap_err()
            .is_validation()
    );
    assert!(store.search("Patient", &SearchParams::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_queries() {
    let store = store();
    store.add(patient("p1", "A", "1")).await.unwrap();
    store.add(patient("p2", "B", "2")).await.unwrap();
    store
        .add(NewEntry::present(
            Key::new("Encounter", "e1"),
            json!({"resourceType": "Encounter", "status": "finished"}),
        ))
        .await
        .unwrap();
    store.delete(&Key::new("Patient", "p2")).await.unwrap();

    assert_eq!(store.resource_types().await.unwrap(), vec!["Encounter", "Patient"]);
    assert_eq!(store.count(None).await.unwrap(), 2);
    assert_eq!(store.count(Some("Patient")).await.unwrap(), 1);
    assert_eq!(store.backend_name(), "memory");

    let current = store
        .get_current(
            &[
                Key::new("Patient", "p2"),
                Key::new("Patient", "p1"),
                Key::new("Patient", "missing"),
            ],
            "",
        )
        .await
        .unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].key.id, "p1");

    let batch = store
        .get_batch(
            &[
                Key::versioned("Patient", "p2", "1"),
                Key::new("Patient", "p2"),
                Key::versioned("Patient", "p1", "7"),
            ],
            "-_sequence",
        )
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch[0].is_deleted());
    assert!(batch[1].is_present());
}
