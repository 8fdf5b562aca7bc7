//! Search parameter declarations.
//!
//! Each resource type gets a [`ResourceDescriptor`] naming its searchable
//! parameters, their kind, and how to pull values out of a payload. The
//! registry is handed to the store at construction; nothing here is global.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use octofhir_core::search_index::{
    DateRange, extract_dates, extract_numbers, extract_strings, extract_tokens,
};
use serde_json::Value;

use crate::search_index::IndexValue;

/// Parameter name matching the logical id.
pub const PARAM_ID: &str = "_id";
/// Parameter name matching the commit timestamp.
pub const PARAM_LAST_UPDATED: &str = "_lastUpdated";

/// How a parameter's values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Token,
    String,
    Date,
    Number,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::String => "string",
            Self::Date => "date",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hand-written extraction for values a path cannot reach.
pub type CustomExtractor = Arc<dyn Fn(&Value) -> Vec<IndexValue> + Send + Sync>;

#[derive(Clone)]
pub enum Extractor {
    /// A FHIRPath-like path such as `Patient.name.family`.
    Path(String),
    Custom(CustomExtractor),
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParameterDef {
    pub name: String,
    pub kind: ParamKind,
    pub extractor: Extractor,
}

impl SearchParameterDef {
    pub fn path(name: impl Into<String>, kind: ParamKind, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            extractor: Extractor::Path(expression.into()),
        }
    }

    pub fn token(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::path(name, ParamKind::Token, expression)
    }

    pub fn string(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::path(name, ParamKind::String, expression)
    }

    pub fn date(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::path(name, ParamKind::Date, expression)
    }

    pub fn number(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::path(name, ParamKind::Number, expression)
    }

    pub fn custom<F>(name: impl Into<String>, kind: ParamKind, extract: F) -> Self
    where
        F: Fn(&Value) -> Vec<IndexValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            extractor: Extractor::Custom(Arc::new(extract)),
        }
    }

    /// Index values of this parameter for one payload.
    pub fn extract(&self, resource_type: &str, payload: &Value) -> Vec<IndexValue> {
        let expression = match &self.extractor {
            Extractor::Custom(f) => return f(payload),
            Extractor::Path(expression) => expression,
        };
        match self.kind {
            ParamKind::Token => extract_tokens(payload, resource_type, expression)
                .into_iter()
                .map(IndexValue::Token)
                .collect(),
            ParamKind::String => extract_strings(payload, resource_type, expression)
                .into_iter()
                .map(IndexValue::Text)
                .collect(),
            ParamKind::Date => extract_dates(payload, resource_type, expression)
                .into_iter()
                .map(IndexValue::Date)
                .collect(),
            ParamKind::Number => extract_numbers(payload, resource_type, expression)
                .into_iter()
                .map(IndexValue::Number)
                .collect(),
        }
    }
}

/// The searchable surface of one resource type.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub resource_type: String,
    params: BTreeMap<String, SearchParameterDef>,
}

impl ResourceDescriptor {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, def: SearchParameterDef) -> Self {
        self.params.insert(def.name.clone(), def);
        self
    }

    pub fn param(&self, name: &str) -> Option<&SearchParameterDef> {
        self.params.get(name)
    }

    pub fn params(&self) -> impl Iterator<Item = &SearchParameterDef> {
        self.params.values()
    }

    /// Every declared `(name, value)` pair for a payload.
    pub fn extract_all(&self, payload: &Value) -> Vec<(String, IndexValue)> {
        let mut values = Vec::new();
        for def in self.params.values() {
            for value in def.extract(&self.resource_type, payload) {
                values.push((def.name.clone(), value));
            }
        }
        values
    }
}

/// Descriptors keyed by resource type.
#[derive(Debug, Clone, Default)]
pub struct SearchParameterRegistry {
    types: HashMap<String, ResourceDescriptor>,
}

impl SearchParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier descriptor for the same type.
    #[must_use]
    pub fn with(mut self, descriptor: ResourceDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn register(&mut self, descriptor: ResourceDescriptor) {
        self.types
            .insert(descriptor.resource_type.clone(), descriptor);
    }

    pub fn descriptor(&self, resource_type: &str) -> Option<&ResourceDescriptor> {
        self.types.get(resource_type)
    }

    pub fn is_registered(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    /// Kind of a parameter, built-ins included.
    pub fn kind_of(&self, resource_type: &str, name: &str) -> Option<ParamKind> {
        match name {
            PARAM_ID => Some(ParamKind::Token),
            PARAM_LAST_UPDATED => Some(ParamKind::Date),
            _ => self
                .descriptor(resource_type)
                .and_then(|d| d.param(name))
                .map(|p| p.kind),
        }
    }

    /// Declared and built-in index values for one current entry.
    pub fn index_values(
        &self,
        resource_type: &str,
        id: &str,
        payload: &Value,
    ) -> Vec<(String, IndexValue)> {
        let mut values = vec![(PARAM_ID.to_string(), IndexValue::Token(id.to_string()))];
        if let Some(descriptor) = self.descriptor(resource_type) {
            values.extend(descriptor.extract_all(payload));
        }
        values
    }

    /// A small set of common clinical parameters.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(
                ResourceDescriptor::new("Patient")
                    .with_param(SearchParameterDef::token("identifier", "Patient.identifier"))
                    .with_param(SearchParameterDef::string("name", "Patient.name"))
                    .with_param(SearchParameterDef::string("family", "Patient.name.family"))
                    .with_param(SearchParameterDef::string("given", "Patient.name.given"))
                    .with_param(SearchParameterDef::token("gender", "Patient.gender"))
                    .with_param(SearchParameterDef::date("birthdate", "Patient.birthDate"))
                    .with_param(SearchParameterDef::token("active", "Patient.active")),
            )
            .with(
                ResourceDescriptor::new("Practitioner")
                    .with_param(SearchParameterDef::token(
                        "identifier",
                        "Practitioner.identifier",
                    ))
                    .with_param(SearchParameterDef::string("name", "Practitioner.name")),
            )
            .with(
                ResourceDescriptor::new("Observation")
                    .with_param(SearchParameterDef::token("code", "Observation.code"))
                    .with_param(SearchParameterDef::token("status", "Observation.status"))
                    .with_param(SearchParameterDef::token("subject", "Observation.subject"))
                    .with_param(SearchParameterDef::date("date", "Observation.effective"))
                    .with_param(SearchParameterDef::number(
                        "value-quantity",
                        "Observation.valueQuantity",
                    )),
            )
            .with(
                ResourceDescriptor::new("Encounter")
                    .with_param(SearchParameterDef::token("status", "Encounter.status"))
                    .with_param(SearchParameterDef::token("subject", "Encounter.subject"))
                    .with_param(SearchParameterDef::date("date", "Encounter.period")),
            )
    }
}

/// Date value of a bare instant, for custom extractors.
pub fn instant_value(at: time::OffsetDateTime) -> IndexValue {
    IndexValue::Date(DateRange::instant(at))
}
