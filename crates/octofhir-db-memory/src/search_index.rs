//! Inverted search index over current, present entries.
//!
//! ```text
//! (type, param) ──► BTreeMap<IndexValue, BTreeSet<id>>
//! (type, id)    ──► [(param, IndexValue)]     reverse postings
//! ```
//!
//! The reverse postings make removal exact: replacing or deleting an id only
//! touches the buckets it was actually in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use octofhir_core::search_index::DateRange;
use octofhir_storage::Key;

use crate::query::{Predicate, Prefix};

/// One indexed value.
#[derive(Debug, Clone)]
pub enum IndexValue {
    Token(String),
    /// Normalized (lowercased) text.
    Text(String),
    Date(DateRange),
    Number(f64),
}

impl IndexValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Token(_) => 0,
            Self::Text(_) => 1,
            Self::Date(_) => 2,
            Self::Number(_) => 3,
        }
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Token(a), Self::Token(b)) | (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => {
                a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end))
            }
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

type Bucket = BTreeMap<IndexValue, BTreeSet<String>>;

#[derive(Debug, Default)]
pub struct SearchIndex {
    /// resource type -> param -> bucket
    buckets: HashMap<String, HashMap<String, Bucket>>,
    postings: HashMap<Key, Vec<(String, IndexValue)>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `values` the complete set of postings for `key`.
    pub fn update(&mut self, key: &Key, values: Vec<(String, IndexValue)>) {
        self.remove(key);
        let buckets = self.buckets.entry(key.resource_type.clone()).or_default();
        for (param, value) in &values {
            buckets
                .entry(param.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(key.id.clone());
        }
        self.postings.insert(key.without_version(), values);
    }

    /// Drop `key` from every bucket of its type.
    pub fn remove(&mut self, key: &Key) {
        let Some(old) = self.postings.remove(key) else {
            return;
        };
        let Some(buckets) = self.buckets.get_mut(&key.resource_type) else {
            return;
        };
        for (param, value) in old {
            let Some(bucket) = buckets.get_mut(&param) else {
                continue;
            };
            if let Some(ids) = bucket.get_mut(&value) {
                ids.remove(&key.id);
                if ids.is_empty() {
                    bucket.remove(&value);
                }
            }
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.postings.clear();
    }

    pub fn is_indexed(&self, key: &Key) -> bool {
        self.postings.contains_key(key)
    }

    /// Values `key` is indexed under for one parameter, ascending.
    pub fn values_of(&self, key: &Key, param: &str) -> Vec<&IndexValue> {
        let mut values: Vec<&IndexValue> = self
            .postings
            .get(key)
            .map(|postings| {
                postings
                    .iter()
                    .filter(|(p, _)| p == param)
                    .map(|(_, v)| v)
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values
    }

    /// Ids of `resource_type` whose values for `param` satisfy `predicate`.
    pub fn lookup(&self, resource_type: &str, param: &str, predicate: &Predicate) -> BTreeSet<String> {
        let Some(bucket) = self.buckets.get(resource_type).and_then(|b| b.get(param)) else {
            return BTreeSet::new();
        };

        let mut ids = BTreeSet::new();
        let mut collect = |set: &BTreeSet<String>| ids.extend(set.iter().cloned());

        match predicate {
            Predicate::Token(code) => {
                if let Some(set) = bucket.get(&IndexValue::Token(code.clone())) {
                    collect(set);
                }
            }
            Predicate::Text(prefix) => {
                let start = IndexValue::Text(prefix.clone());
                for (value, set) in bucket.range(start..) {
                    match value {
                        IndexValue::Text(s) if s.starts_with(prefix.as_str()) => collect(set),
                        _ => break,
                    }
                }
            }
            Predicate::Date { prefix, range } => {
                for (value, set) in date_candidates(bucket, *prefix, range) {
                    if let IndexValue::Date(stored) = value
                        && Predicate::matches_date(*prefix, range, stored)
                    {
                        collect(set);
                    }
                }
            }
            Predicate::Number { prefix, value } => {
                for (stored, set) in bucket.iter() {
                    if let IndexValue::Number(n) = stored
                        && Predicate::matches_number(*prefix, *value, *n)
                    {
                        collect(set);
                    }
                }
            }
        }
        ids
    }
}

/// Narrow a date bucket with a range scan where the prefix allows it.
///
/// Date keys order by start, so lower-bounded prefixes can skip everything
/// that starts before the query.
fn date_candidates<'a>(
    bucket: &'a Bucket,
    prefix: Prefix,
    range: &DateRange,
) -> Box<dyn Iterator<Item = (&'a IndexValue, &'a BTreeSet<String>)> + 'a> {
    match prefix {
        Prefix::Eq | Prefix::Ge => {
            let start = IndexValue::Date(DateRange::instant(range.start));
            Box::new(bucket.range(start..))
        }
        Prefix::Gt => {
            let start = IndexValue::Date(DateRange::instant(range.end));
            Box::new(bucket.range(start..))
        }
        Prefix::Ne | Prefix::Lt | Prefix::Le => Box::new(bucket.iter()),
    }
}
