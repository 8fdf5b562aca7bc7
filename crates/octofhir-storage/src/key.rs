//! Resource identity.
//!
//! A [`Key`] names a logical resource by `(resource_type, id)` and optionally
//! pins one version of it. On reads an unversioned key means "the current
//! version"; on writes a versioned key is an If-Match expectation on the
//! current version.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use octofhir_core::CoreError;
use serde::{Deserialize, Serialize};

const HISTORY_SEGMENT: &str = "_history";

/// Version component of a [`Key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "label")]
pub enum Version {
    #[default]
    Unversioned,
    Versioned(String),
}

impl Version {
    pub fn label(&self) -> Option<&str> {
        match self {
            Version::Unversioned => None,
            Version::Versioned(v) => Some(v),
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, Version::Versioned(_))
    }
}

impl From<Option<String>> for Version {
    fn from(value: Option<String>) -> Self {
        value.map_or(Version::Unversioned, Version::Versioned)
    }
}

/// Identity of a stored resource.
///
/// Equality, hashing and ordering look at `resource_type` and `id` only, so
/// keys can be used to address a logical resource regardless of version.
/// Use [`Key::same_version`] to compare the version component too.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub version: Version,
}

impl Key {
    /// Unversioned key for the logical resource `resource_type/id`.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: Version::Unversioned,
        }
    }

    pub fn versioned(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: Version::Versioned(version.into()),
        }
    }

    #[must_use]
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            id: self.id.clone(),
            version: Version::Versioned(version.into()),
        }
    }

    #[must_use]
    pub fn without_version(&self) -> Self {
        Self::new(self.resource_type.clone(), self.id.clone())
    }

    pub fn version_label(&self) -> Option<&str> {
        self.version.label()
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_versioned()
    }

    /// Full equality including the version component.
    pub fn same_version(&self, other: &Key) -> bool {
        self == other && self.version == other.version
    }

    /// `Type/id`, without the version.
    pub fn logical(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type && self.id == other.id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.resource_type
            .cmp(&other.resource_type)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Version::Unversioned => write!(f, "{}/{}", self.resource_type, self.id),
            Version::Versioned(v) => write!(
                f,
                "{}/{}/{HISTORY_SEGMENT}/{v}",
                self.resource_type, self.id
            ),
        }
    }
}

impl FromStr for Key {
    type Err = CoreError;

    /// Parses `Type/id` or `Type/id/_history/version`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [t, id] if !t.is_empty() && !id.is_empty() => Ok(Key::new(*t, *id)),
            [t, id, HISTORY_SEGMENT, v] if !t.is_empty() && !id.is_empty() && !v.is_empty() => {
                Ok(Key::versioned(*t, *id, *v))
            }
            _ => Err(CoreError::invalid_key(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_version() {
        let a = Key::new("Patient", "p1");
        let b = Key::versioned("Patient", "p1", "3");
        assert_eq!(a, b);
        assert!(!a.same_version(&b));
        assert!(b.same_version(&a.with_version("3")));

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(Key::new("Patient", "p1"), Key::new("Observation", "p1"));
    }

    #[test]
    fn test_ordering() {
        let mut keys = vec![
            Key::new("Patient", "b"),
            Key::new("Observation", "z"),
            Key::new("Patient", "a"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, ["Observation/z", "Patient/a", "Patient/b"]);
    }

    #[test]
    fn test_display_and_parse() {
        let key = Key::versioned("Patient", "p1", "2");
        assert_eq!(key.to_string(), "Patient/p1/_history/2");

        let parsed: Key = "Patient/p1/_history/2".parse().unwrap();
        assert!(parsed.same_version(&key));

        let parsed: Key = "Patient/p1".parse().unwrap();
        assert_eq!(parsed.version, Version::Unversioned);
        assert_eq!(parsed.logical(), "Patient/p1");

        assert!("Patient".parse::<Key>().is_err());
        assert!("Patient/p1/2".parse::<Key>().is_err());
        assert!("Patient//_history/1".parse::<Key>().is_err());
    }

    #[test]
    fn test_version_helpers() {
        assert_eq!(Version::from(Some("4".to_string())).label(), Some("4"));
        assert_eq!(Version::from(None), Version::Unversioned);
        assert!(!Key::new("Patient", "p1").is_versioned());
        assert_eq!(
            Key::versioned("Patient", "p1", "1").without_version().version,
            Version::Unversioned
        );
    }
}
