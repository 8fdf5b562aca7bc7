//! Search index extraction engine.
//!
//! Extracts token, string, date, and number values from FHIR resource JSON
//! so a store can maintain per-parameter lookup structures.

use serde_json::Value;
use time::{Date, Month, OffsetDateTime};

use crate::time::parse_rfc3339;

/// An extracted date with its implicit precision expanded to a closed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl DateRange {
    pub fn instant(at: OffsetDateTime) -> Self {
        Self { start: at, end: at }
    }
}

/// Collect the raw JSON values a path expression points at.
pub fn extract_values(resource: &Value, resource_type: &str, expression: &str) -> Vec<Value> {
    let path_segments = fhirpath_to_segments(expression, resource_type);
    if path_segments.is_empty() {
        return Vec::new();
    }

    let mut values = Vec::new();
    navigate_json(resource, &path_segments, 0, &mut values);
    values
}

// ============================================================================
// Token Extraction
// ============================================================================

/// Extract token values (codes, identifiers, references, booleans).
///
/// System-qualified values are indexed twice, as `code` and `system|code`,
/// so both query forms hit.
pub fn extract_tokens(resource: &Value, resource_type: &str, expression: &str) -> Vec<String> {
    let mut results = Vec::new();
    for value in extract_values(resource, resource_type, expression) {
        collect_tokens(&value, &mut results);
    }
    results.sort();
    results.dedup();
    results
}

fn collect_tokens(value: &Value, results: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => results.push(s.clone()),
        Value::Bool(b) => results.push(b.to_string()),
        Value::Number(n) => results.push(n.to_string()),
        Value::Object(obj) => {
            // CodeableConcept
            if let Some(codings) = obj.get("coding").and_then(|c| c.as_array()) {
                for coding in codings {
                    collect_tokens(coding, results);
                }
                return;
            }

            // Reference
            if let Some(reference) = obj.get("reference").and_then(|r| r.as_str()) {
                results.push(reference.to_string());
                return;
            }

            // Coding uses `code`, Identifier and ContactPoint use `value`
            let code = obj
                .get("code")
                .or_else(|| obj.get("value"))
                .and_then(|c| c.as_str());
            if let Some(code) = code
                && !code.is_empty()
            {
                results.push(code.to_string());
                if let Some(system) = obj.get("system").and_then(|s| s.as_str()) {
                    results.push(format!("{system}|{code}"));
                }
            }
        }
        _ => {}
    }
}

// ============================================================================
// Date Extraction
// ============================================================================

/// Extract date values from a FHIR resource for indexing.
///
/// Converts FHIR date precision (year, month, day, instant) into explicit
/// start/end ranges so range queries can test containment.
pub fn extract_dates(resource: &Value, resource_type: &str, expression: &str) -> Vec<DateRange> {
    let mut results = Vec::new();

    for date_value in extract_values(resource, resource_type, expression) {
        // Handle Period type (has start/end)
        if date_value.get("start").is_some() || date_value.get("end").is_some() {
            if let Some(range) = parse_period_to_range(&date_value) {
                results.push(range);
            }
            continue;
        }

        if let Some(date_str) = date_value.as_str()
            && let Some(range) = parse_date_range(date_str)
        {
            results.push(range);
        }
    }

    results
}

/// Parse a FHIR date string into a start/end range based on precision.
pub fn parse_date_range(date_str: &str) -> Option<DateRange> {
    let trimmed = date_str.trim();
    let len = trimmed.len();

    // Year only: "2024"
    if len == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = trimmed.parse().ok()?;
        return day_span(year, 1, 1, year, 12, 31);
    }

    // Year-Month: "2024-03"
    if len == 7 && trimmed.chars().nth(4) == Some('-') {
        let year: i32 = trimmed.get(..4)?.parse().ok()?;
        let month: u8 = trimmed.get(5..7)?.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        let last_day = days_in_month(year, month);
        return day_span(year, month, 1, year, month, last_day);
    }

    // Full date: "2024-03-15"
    if len == 10 && !trimmed.contains('T') {
        let year: i32 = trimmed.get(..4)?.parse().ok()?;
        let month: u8 = trimmed.get(5..7)?.parse().ok()?;
        let day: u8 = trimmed.get(8..10)?.parse().ok()?;
        return day_span(year, month, day, year, month, day);
    }

    // DateTime with timezone: already a precise instant
    if trimmed.contains('T') {
        return parse_rfc3339(trimmed).ok().map(DateRange::instant);
    }

    None
}

fn day_span(
    start_year: i32,
    start_month: u8,
    start_day: u8,
    end_year: i32,
    end_month: u8,
    end_day: u8,
) -> Option<DateRange> {
    let start = Date::from_calendar_date(start_year, Month::try_from(start_month).ok()?, start_day)
        .ok()?
        .with_hms(0, 0, 0)
        .ok()?
        .assume_utc();
    let end = Date::from_calendar_date(end_year, Month::try_from(end_month).ok()?, end_day)
        .ok()?
        .with_hms_milli(23, 59, 59, 999)
        .ok()?
        .assume_utc();
    Some(DateRange { start, end })
}

/// Parse a FHIR Period into start/end timestamps.
fn parse_period_to_range(period: &Value) -> Option<DateRange> {
    let start = period
        .get("start")
        .and_then(|s| s.as_str())
        .and_then(|s| parse_date_range(s).map(|r| r.start));

    let end = period
        .get("end")
        .and_then(|e| e.as_str())
        .and_then(|e| parse_date_range(e).map(|r| r.end));

    match (start, end) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        (Some(s), None) => Some(DateRange::instant(s)), // Open-ended period
        (None, Some(e)) => Some(DateRange::instant(e)),
        (None, None) => None,
    }
}

/// Get number of days in a month.
fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

// ============================================================================
// String Extraction
// ============================================================================

/// Extract normalized string values from a FHIR resource for indexing.
pub fn extract_strings(resource: &Value, resource_type: &str, expression: &str) -> Vec<String> {
    let mut results = Vec::new();

    for str_value in extract_values(resource, resource_type, expression) {
        // Handle HumanName type
        if str_value.get("family").is_some() || str_value.get("given").is_some() {
            extract_human_name_strings(&str_value, &mut results);
            continue;
        }

        // Handle Address type
        if str_value.get("line").is_some() || str_value.get("city").is_some() {
            extract_address_strings(&str_value, &mut results);
            continue;
        }

        if let Some(s) = str_value.as_str()
            && !s.is_empty()
        {
            results.push(normalize_string(s));
        }
    }

    results.sort();
    results.dedup();
    results
}

fn push_str(value: Option<&Value>, results: &mut Vec<String>) {
    if let Some(s) = value.and_then(|v| v.as_str())
        && !s.is_empty()
    {
        results.push(normalize_string(s));
    }
}

fn extract_human_name_strings(name: &Value, results: &mut Vec<String>) {
    push_str(name.get("family"), results);
    push_str(name.get("text"), results);

    if let Some(given) = name.get("given").and_then(|g| g.as_array()) {
        for g in given {
            push_str(Some(g), results);
        }
    }
}

fn extract_address_strings(addr: &Value, results: &mut Vec<String>) {
    for field in &["city", "state", "country", "postalCode", "district", "text"] {
        push_str(addr.get(field), results);
    }

    if let Some(lines) = addr.get("line").and_then(|l| l.as_array()) {
        for line in lines {
            push_str(Some(line), results);
        }
    }
}

/// Normalize a string for search: lowercase only.
pub fn normalize_string(s: &str) -> String {
    s.to_lowercase()
}

// ============================================================================
// Number Extraction
// ============================================================================

/// Extract numeric values (plain numbers, Quantity.value, numeric strings).
pub fn extract_numbers(resource: &Value, resource_type: &str, expression: &str) -> Vec<f64> {
    extract_values(resource, resource_type, expression)
        .iter()
        .filter_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Object(obj) => obj.get("value").and_then(|v| v.as_f64()),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .collect()
}

// ============================================================================
// JSON Navigation Helpers
// ============================================================================

/// Convert a FHIRPath expression to JSON path segments.
///
/// Simplified conversion for common patterns like `Observation.subject`,
/// `Patient.name.family`, etc. Strips resource type prefix and FHIRPath functions.
fn fhirpath_to_segments(expression: &str, resource_type: &str) -> Vec<String> {
    // Handle union expressions — find the one matching our resource type
    let expr = if expression.contains('|') {
        expression
            .split('|')
            .map(|s| s.trim())
            .find(|s| s.starts_with(&format!("{resource_type}.")))
            .or_else(|| expression.split('|').next().map(|s| s.trim()))
            .unwrap_or(expression)
    } else {
        expression
    };

    // Strip `as Type` casting
    let expr = if let Some(idx) = expr.find(" as ") {
        expr[..idx]
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
    } else {
        expr
    };

    // Strip resource type prefix
    let expr = expr
        .strip_prefix(&format!("{resource_type}."))
        .or_else(|| expr.strip_prefix("Resource."))
        .or_else(|| expr.strip_prefix("DomainResource."))
        .or_else(|| {
            if let Some(idx) = expr.find('.') {
                let prefix = &expr[..idx];
                if prefix
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_uppercase())
                    .unwrap_or(false)
                {
                    return Some(&expr[idx + 1..]);
                }
            }
            None
        })
        .unwrap_or(expr);

    let expr = strip_fhirpath_functions(expr);

    expr.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| {
            // Remove array subscripts
            if let Some(base) = s.strip_suffix(']')
                && let Some((name, _)) = base.split_once('[')
            {
                return name.to_string();
            }
            s.to_string()
        })
        .collect()
}

/// Strip FHIRPath function calls, keeping property paths.
fn strip_fhirpath_functions(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut i = 0;
    let bytes = expr.as_bytes();

    while i < bytes.len() {
        if bytes[i] == b'(' {
            let mut depth = 1;
            i += 1;
            while i < bytes.len() && depth > 0 {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                i += 1;
            }
            if let Some(dot_pos) = result.rfind('.') {
                let func = &result[dot_pos + 1..];
                if is_fhirpath_function(func) {
                    result.truncate(dot_pos);
                }
            } else if is_fhirpath_function(&result) {
                result.clear();
            }
        } else {
            result.push(bytes[i] as char);
            i += 1;
        }
    }

    while result.ends_with('.') {
        result.pop();
    }
    while result.starts_with('.') {
        result.remove(0);
    }

    result
}

fn is_fhirpath_function(name: &str) -> bool {
    matches!(
        name,
        "where"
            | "resolve"
            | "ofType"
            | "exists"
            | "empty"
            | "first"
            | "last"
            | "as"
            | "is"
            | "not"
            | "all"
            | "any"
            | "count"
            | "distinct"
            | "single"
            | "type"
    )
}

/// Navigate JSON following path segments, collecting leaf values.
///
/// Handles arrays transparently — if a segment points to an array,
/// recurse into each element. Also handles FHIR polymorphic fields
/// (e.g., `effective` matches `effectiveDateTime`, `effectivePeriod`).
fn navigate_json(value: &Value, segments: &[String], depth: usize, results: &mut Vec<Value>) {
    if depth >= segments.len() {
        match value {
            Value::Array(arr) => {
                for item in arr {
                    results.push(item.clone());
                }
            }
            Value::Null => {}
            _ => results.push(value.clone()),
        }
        return;
    }

    let segment = &segments[depth];

    match value {
        Value::Object(obj) => {
            if let Some(child) = obj.get(segment.as_str()) {
                navigate_json(child, segments, depth + 1, results);
            } else {
                // e.g., "effective" matches "effectiveDateTime", "effectivePeriod"
                for (key, child) in obj {
                    if key.len() > segment.len()
                        && key.starts_with(segment.as_str())
                        && key.as_bytes()[segment.len()].is_ascii_uppercase()
                    {
                        navigate_json(child, segments, depth + 1, results);
                    }
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                navigate_json(item, segments, depth, results);
            }
        }
        _ => {}
    }
}
