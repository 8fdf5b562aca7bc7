//! Per-type directory of logical ids.

use std::collections::BTreeMap;

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogRecord {
    pub first_seen: OffsetDateTime,
    pub last_modified: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct TypeCatalog {
    types: BTreeMap<String, BTreeMap<String, CatalogRecord>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write to `resource_type/id` at `at`.
    pub fn touch(&mut self, resource_type: &str, id: &str, at: OffsetDateTime) {
        self.types
            .entry(resource_type.to_string())
            .or_default()
            .entry(id.to_string())
            .and_modify(|r| r.last_modified = r.last_modified.max(at))
            .or_insert(CatalogRecord {
                first_seen: at,
                last_modified: at,
            });
    }

    pub fn record(&self, resource_type: &str, id: &str) -> Option<&CatalogRecord> {
        self.types.get(resource_type)?.get(id)
    }

    /// Ids modified at or after `since`, ordered by `(last_modified, id)`.
    pub fn list(&self, resource_type: &str, since: Option<OffsetDateTime>) -> Vec<String> {
        let Some(ids) = self.types.get(resource_type) else {
            return Vec::new();
        };
        let mut matched: Vec<(&OffsetDateTime, &String)> = ids
            .iter()
            .filter(|(_, r)| since.is_none_or(|s| r.last_modified >= s))
            .map(|(id, r)| (&r.last_modified, id))
            .collect();
        matched.sort();
        matched.into_iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn remove(&mut self, resource_type: &str, id: &str) -> bool {
        let Some(ids) = self.types.get_mut(resource_type) else {
            return false;
        };
        let removed = ids.remove(id).is_some();
        if ids.is_empty() {
            self.types.remove(resource_type);
        }
        removed
    }

    /// Types with at least one id, ascending.
    pub fn types(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn ids(&self, resource_type: &str) -> impl Iterator<Item = &String> {
        self.types
            .get(resource_type)
            .into_iter()
            .flat_map(|ids| ids.keys())
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_touch_keeps_first_seen() {
        let mut catalog = TypeCatalog::new();
        let t0 = datetime!(2024-01-01 00:00:00 UTC);
        let t1 = datetime!(2024-01-02 00:00:00 UTC);
        catalog.touch("Patient", "p1", t0);
        catalog.touch("Patient", "p1", t1);

        let record = catalog.record("Patient", "p1").unwrap();
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_modified, t1);
    }

    #[test]
    fn test_list_order_and_since() {
        let mut catalog = TypeCatalog::new();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        catalog.touch("Patient", "b", t);
        catalog.touch("Patient", "a", t);
        catalog.touch("Patient", "old", t - time::Duration::seconds(1));
        catalog.touch("Patient", "c", t + time::Duration::seconds(1));

        assert_eq!(catalog.list("Patient", None), vec!["old", "a", "b", "c"]);
        assert_eq!(catalog.list("Patient", Some(t)), vec!["a", "b", "c"]);
        assert!(catalog.list("Observation", None).is_empty());
    }

    #[test]
    fn test_remove_and_types() {
        let mut catalog = TypeCatalog::new();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        catalog.touch("Patient", "p1", t);
        catalog.touch("Observation", "o1", t);
        assert_eq!(catalog.types(), vec!["Observation", "Patient"]);

        assert!(catalog.remove("Observation", "o1"));
        assert!(!catalog.remove("Observation", "o1"));
        assert_eq!(catalog.types(), vec!["Patient"]);
        assert_eq!(catalog.ids("Patient").count(), 1);
    }
}
