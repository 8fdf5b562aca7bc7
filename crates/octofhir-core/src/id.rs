use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, Result};

/// FHIR `id` datatype: 1-64 characters from `[A-Za-z0-9-.]`.
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("id pattern is valid"));

/// Resource type names are PascalCase identifiers (`Patient`, `MedicationRequest`).
static RESOURCE_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("type pattern is valid"));

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn validate_id(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(CoreError::invalid_id(id))
    }
}

pub fn validate_resource_type(resource_type: &str) -> Result<()> {
    if RESOURCE_TYPE_PATTERN.is_match(resource_type) {
        Ok(())
    } else {
        Err(CoreError::invalid_resource_type(resource_type))
    }
}
