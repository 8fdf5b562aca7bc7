//! Search value parsing.
//!
//! Turns raw `name=value` strings into typed predicates the search index can
//! evaluate. Every rejection here is a `Validation` error.

use octofhir_core::search_index::{DateRange, normalize_string, parse_date_range};
use octofhir_storage::StorageError;

use crate::params::ParamKind;

/// Comparison prefix for ordered (date, number) parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prefix {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Prefix {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

/// One parsed search value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Exact match on `code` or `system|code`.
    Token(String),
    /// Case-insensitive starts-with on a normalized string.
    Text(String),
    Date { prefix: Prefix, range: DateRange },
    Number { prefix: Prefix, value: f64 },
}

impl Predicate {
    /// Whether a stored date satisfies this predicate.
    ///
    /// The stored value is compared by its start; the query value by its
    /// implicit range, so `2024` matches anything that starts in 2024.
    pub fn matches_date(prefix: Prefix, query: &DateRange, stored: &DateRange) -> bool {
        let at = stored.start;
        match prefix {
            Prefix::Eq => at >= query.start && at <= query.end,
            Prefix::Ne => at < query.start || at > query.end,
            Prefix::Gt => at > query.end,
            Prefix::Ge => at >= query.start,
            Prefix::Lt => at < query.start,
            Prefix::Le => at <= query.end,
        }
    }

    pub fn matches_number(prefix: Prefix, query: f64, stored: f64) -> bool {
        match prefix {
            Prefix::Eq => stored == query,
            Prefix::Ne => stored != query,
            Prefix::Gt => stored > query,
            Prefix::Ge => stored >= query,
            Prefix::Lt => stored < query,
            Prefix::Le => stored <= query,
        }
    }
}

/// Parse one raw value for a parameter of `kind`.
pub fn parse_predicate(name: &str, kind: ParamKind, raw: &str) -> Result<Predicate, StorageError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StorageError::validation(format!(
            "Empty value for search parameter '{name}'"
        )));
    }

    match kind {
        ParamKind::Token => parse_token(name, raw),
        ParamKind::String => Ok(Predicate::Text(normalize_string(raw))),
        ParamKind::Date => {
            let (prefix, value) = split_prefix(name, raw)?;
            let range = parse_date_range(value).ok_or_else(|| {
                StorageError::validation(format!(
                    "Invalid date '{value}' for search parameter '{name}'"
                ))
            })?;
            Ok(Predicate::Date { prefix, range })
        }
        ParamKind::Number => {
            let (prefix, value) = split_prefix(name, raw)?;
            let number = value
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| {
                    StorageError::validation(format!(
                        "Invalid number '{value}' for search parameter '{name}'"
                    ))
                })?;
            Ok(Predicate::Number {
                prefix,
                value: number,
            })
        }
    }
}

fn parse_token(name: &str, raw: &str) -> Result<Predicate, StorageError> {
    // `|code` means "code without a system"; the index has no such notion,
    // so it degrades to a plain code match.
    let token = match raw.split_once('|') {
        Some((system, code)) if code.is_empty() => {
            return Err(StorageError::validation(format!(
                "Token '{raw}' for search parameter '{name}' has system '{system}' but no code"
            )));
        }
        Some(("", code)) => code,
        _ => raw,
    };
    Ok(Predicate::Token(token.to_string()))
}

/// Split a two-letter comparison prefix off an ordered value.
fn split_prefix<'a>(name: &str, raw: &'a str) -> Result<(Prefix, &'a str), StorageError> {
    let letters = raw.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    if letters == 0 {
        return Ok((Prefix::Eq, raw));
    }
    let (head, rest) = raw.split_at(letters);
    match Prefix::parse(head) {
        Some(prefix) if !rest.is_empty() => Ok((prefix, rest)),
        Some(_) => Err(StorageError::validation(format!(
            "Missing value after prefix '{head}' for search parameter '{name}'"
        ))),
        None => Err(StorageError::validation(format!(
            "Unknown prefix '{head}' for search parameter '{name}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_token_values() {
        assert_eq!(
            parse_predicate("identifier", ParamKind::Token, "123").unwrap(),
            Predicate::Token("123".into())
        );
        assert_eq!(
            parse_predicate("identifier", ParamKind::Token, "urn:mrn|123").unwrap(),
            Predicate::Token("urn:mrn|123".into())
        );
        assert_eq!(
            parse_predicate("identifier", ParamKind::Token, "|123").unwrap(),
            Predicate::Token("123".into())
        );
        assert!(parse_predicate("identifier", ParamKind::Token, "urn:mrn|").is_err());
    }

    #[test]
    fn test_string_values_are_normalized() {
        assert_eq!(
            parse_predicate("name", ParamKind::String, "  SMI ").unwrap(),
            Predicate::Text("smi".into())
        );
        assert!(parse_predicate("name", ParamKind::String, "   ").is_err());
    }

    #[test]
    fn test_date_prefixes() {
        let p = parse_predicate("birthdate", ParamKind::Date, "ge2024-03").unwrap();
        let Predicate::Date { prefix, range } = p else {
            panic!("expected date predicate");
        };
        assert_eq!(prefix, Prefix::Ge);
        assert_eq!(range.start, datetime!(2024-03-01 00:00:00 UTC));

        let p = parse_predicate("birthdate", ParamKind::Date, "2024").unwrap();
        assert!(matches!(p, Predicate::Date { prefix: Prefix::Eq, .. }));

        let err = parse_predicate("birthdate", ParamKind::Date, "xx2024").unwrap_err();
        assert!(err.is_validation());
        assert!(parse_predicate("birthdate", ParamKind::Date, "ge").is_err());
        assert!(parse_predicate("birthdate", ParamKind::Date, "2024-13-45").is_err());
    }

    #[test]
    fn test_number_values() {
        assert_eq!(
            parse_predicate("value", ParamKind::Number, "lt5.5").unwrap(),
            Predicate::Number {
                prefix: Prefix::Lt,
                value: 5.5
            }
        );
        assert!(parse_predicate("value", ParamKind::Number, "abc").is_err());
        assert!(parse_predicate("value", ParamKind::Number, "NaN").is_err());
    }

    #[test]
    fn test_date_matching_by_range() {
        let year = parse_date_range("2024").unwrap();
        let inside = DateRange::instant(datetime!(2024-06-15 10:00:00 UTC));
        let before = DateRange::instant(datetime!(2023-12-31 23:59:59 UTC));
        let after = DateRange::instant(datetime!(2025-01-01 00:00:00 UTC));

        assert!(Predicate::matches_date(Prefix::Eq, &year, &inside));
        assert!(!Predicate::matches_date(Prefix::Eq, &year, &before));
        assert!(Predicate::matches_date(Prefix::Ne, &year, &after));
        assert!(Predicate::matches_date(Prefix::Gt, &year, &after));
        assert!(!Predicate::matches_date(Prefix::Gt, &year, &inside));
        assert!(Predicate::matches_date(Prefix::Ge, &year, &inside));
        assert!(Predicate::matches_date(Prefix::Lt, &year, &before));
        assert!(Predicate::matches_date(Prefix::Le, &year, &inside));
        assert!(!Predicate::matches_date(Prefix::Le, &year, &after));
    }

    #[test]
    fn test_number_matching() {
        assert!(Predicate::matches_number(Prefix::Ge, 5.0, 5.0));
        assert!(!Predicate::matches_number(Prefix::Gt, 5.0, 5.0));
        assert!(Predicate::matches_number(Prefix::Ne, 5.0, 4.0));
        assert!(Predicate::matches_number(Prefix::Le, 5.0, -1.0));
    }
}
