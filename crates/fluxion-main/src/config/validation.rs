// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of checking an [`AppConfig`](super::AppConfig) before the
/// dispatcher starts.
///
/// Errors block startup. Warnings are logged and the dispatcher runs anyway,
/// e.g. a zero export limit or a very short fast-loop interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Empty result; stays valid until the first error is recorded
    pub fn success() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a setting the dispatcher cannot run with
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.push(ValidationSeverity::Error, field.into(), message.into());
    }

    /// Record a setting that is usable but likely a mistake
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(ValidationSeverity::Warning, field.into(), message.into());
    }

    fn push(&mut self, severity: ValidationSeverity, field: String, message: String) {
        let issue = ValidationIssue {
            field,
            message,
            severity,
        };
        match severity {
            ValidationSeverity::Error => self.errors.push(issue),
            ValidationSeverity::Warning => self.warnings.push(issue),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[cfg(test)]
    pub fn mentions(&self, field: &str) -> bool {
        self.errors
            .iter()
            .chain(&self.warnings)
            .any(|issue| issue.field == field)
    }
}

/// One rejected or suspicious setting, keyed by its dotted TOML path
/// such as `planner.soc_quantum` or `budget.configured_limit_kw`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: ValidationSeverity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_keep_result_valid() {
        let mut result = ValidationResult::success();
        result.add_warning("scheduler.fast_interval_secs", "very low");
        assert!(result.valid);
        assert!(!result.has_errors());
        assert!(result.mentions("scheduler.fast_interval_secs"));
        assert_eq!(result.warnings[0].severity, ValidationSeverity::Warning);
    }

    #[test]
    fn test_error_invalidates_result() {
        let mut result = ValidationResult::success();
        result.add_error("battery.capacity_kwh", "Must be positive");

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.warnings.is_empty());
        assert_eq!(result.errors[0].severity, ValidationSeverity::Error);
        assert_eq!(
            result.errors[0].to_string(),
            "battery.capacity_kwh: Must be positive"
        );
    }

    #[test]
    fn test_issues_serialize_for_status_output() {
        let mut result = ValidationResult::success();
        result.add_error("planner.soc_quantum", "Must be in (0.0, 0.5]");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["errors"][0]["field"], "planner.soc_quantum");
        assert_eq!(json["errors"][0]["severity"], "error");
    }
}
