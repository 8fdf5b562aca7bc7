//! Severity-tagged operation outcomes.
//!
//! Only the value model lives here. Encoding an outcome to XML/JSON bytes
//! for a response body belongs to the transport layer.

use serde::{Deserialize, Serialize};

/// Severity of a single outcome issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl IssueSeverity {
    /// Map an HTTP-style status code to a severity band.
    ///
    /// 1xx/2xx are informational, 3xx warnings, 4xx errors, 5xx fatal.
    /// Anything outside those ranges is informational.
    pub fn from_status(status: u16) -> Self {
        match status / 100 {
            1 | 2 => Self::Information,
            3 => Self::Warning,
            4 => Self::Error,
            5 => Self::Fatal,
            _ => Self::Information,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    pub severity: IssueSeverity,
    pub details: String,
}

/// An ordered list of issues describing how an operation went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    #[serde(default)]
    pub issue: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error issue.
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.push(IssueSeverity::Error, message);
        self
    }

    /// Append an informational issue.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.push(IssueSeverity::Information, message);
        self
    }

    /// Append an issue whose severity follows the status band.
    pub fn message_with_status(mut self, status: u16, message: impl Into<String>) -> Self {
        self.push(IssueSeverity::from_status(status), message);
        self
    }

    pub fn push(&mut self, severity: IssueSeverity, details: impl Into<String>) {
        self.issue.push(OutcomeIssue {
            severity,
            details: details.into(),
        });
    }

    /// Highest severity across all issues, if any.
    pub fn max_severity(&self) -> Option<IssueSeverity> {
        self.issue.iter().map(|i| i.severity).max_by_key(|s| match s {
            IssueSeverity::Information => 0,
            IssueSeverity::Warning => 1,
            IssueSeverity::Error => 2,
            IssueSeverity::Fatal => 3,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.issue.is_empty()
    }

    /// FHIR JSON shape (`resourceType: OperationOutcome`).
    pub fn to_fhir_json(&self) -> serde_json::Value {
        serde_json::json!({
            "resourceType": "OperationOutcome",
            "issue": self.issue.iter().map(|i| serde_json::json!({
                "severity": i.severity.as_str(),
                "diagnostics": i.details,
            })).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(IssueSeverity::from_status(100), IssueSeverity::Information);
        assert_eq!(IssueSeverity::from_status(200), IssueSeverity::Information);
        assert_eq!(IssueSeverity::from_status(201), IssueSeverity::Information);
        assert_eq!(IssueSeverity::from_status(304), IssueSeverity::Warning);
        assert_eq!(IssueSeverity::from_status(404), IssueSeverity::Error);
        assert_eq!(IssueSeverity::from_status(409), IssueSeverity::Error);
        assert_eq!(IssueSeverity::from_status(500), IssueSeverity::Fatal);
        assert_eq!(IssueSeverity::from_status(503), IssueSeverity::Fatal);
        assert_eq!(IssueSeverity::from_status(0), IssueSeverity::Information);
        assert_eq!(IssueSeverity::from_status(999), IssueSeverity::Information);
    }

    #[test]
    fn test_outcome_builder() {
        let outcome = OperationOutcome::new()
            .message("loaded")
            .message_with_status(404, "Patient/p1 not found")
            .error("boom");

        assert_eq!(outcome.issue.len(), 3);
        assert_eq!(outcome.issue[0].severity, IssueSeverity::Information);
        assert_eq!(outcome.issue[1].severity, IssueSeverity::Error);
        assert_eq!(outcome.max_severity(), Some(IssueSeverity::Error));
        assert!(OperationOutcome::new().max_severity().is_none());
    }

    #[test]
    fn test_outcome_fhir_json() {
        let json = OperationOutcome::new()
            .message_with_status(503, "store unavailable")
            .to_fhir_json();
        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["severity"], "fatal");
        assert_eq!(json["issue"][0]["diagnostics"], "store unavailable");
    }
}
