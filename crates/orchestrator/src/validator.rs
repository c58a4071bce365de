//! Input and output contracts of a workflow.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When a payload was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Input,
    Output,
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStage::Input => f.write_str("input"),
            ValidationStage::Output => f.write_str("output"),
        }
    }
}

/// A single problem found in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer-like path to the offending value; empty for the root.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validates a raw payload and returns the (possibly normalized) value.
///
/// Any schema library can be adapted to this trait.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, raw: Value) -> Result<Value, Vec<ValidationIssue>>;
}

/// A validator backed by a closure.
pub struct FnValidator<F>(pub F);

impl<F> PayloadValidator for FnValidator<F>
where
    F: Fn(Value) -> Result<Value, Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, raw: Value) -> Result<Value, Vec<ValidationIssue>> {
        (self.0)(raw)
    }
}

/// Requires the payload to be an object containing every listed field.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn into_arc(self) -> Arc<dyn PayloadValidator> {
        Arc::new(self)
    }
}

impl PayloadValidator for RequiredFields {
    fn validate(&self, raw: Value) -> Result<Value, Vec<ValidationIssue>> {
        let Some(object) = raw.as_object() else {
            return Err(vec![ValidationIssue::new("", "expected an object")]);
        };

        let issues: Vec<_> = self
            .fields
            .iter()
            .filter(|f| object.get(*f).is_none_or(Value::is_null))
            .map(|f| ValidationIssue::new(format!("/{f}"), "is required"))
            .collect();

        if issues.is_empty() {
            Ok(raw)
        } else {
            Err(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_fields() {
        let validator = RequiredFields::new(["order_id", "customer_id"]);

        assert!(
            validator
                .validate(json!({"order_id": 1, "customer_id": 2}))
                .is_ok()
        );

        let issues = validator
            .validate(json!({"order_id": 1, "customer_id": null}))
            .unwrap_err();
        assert_eq!(issues, vec![ValidationIssue::new("/customer_id", "is required")]);

        let issues = validator.validate(json!([1, 2])).unwrap_err();
        assert_eq!(issues[0].message, "expected an object");
    }

    #[test]
    fn test_fn_validator_can_normalize() {
        let validator = FnValidator(|raw: Value| match raw.as_i64() {
            Some(n) if n >= 0 => Ok(json!({"quantity": n})),
            _ => Err(vec![ValidationIssue::new("", "must be a non-negative integer")]),
        });

        assert_eq!(validator.validate(json!(3)).unwrap(), json!({"quantity": 3}));
        assert!(validator.validate(json!(-1)).is_err());
    }

    #[test]
    fn test_issue_display() {
        assert_eq!(ValidationIssue::new("/a", "bad").to_string(), "/a: bad");
        assert_eq!(ValidationIssue::new("", "bad").to_string(), "bad");
        assert_eq!(ValidationStage::Output.to_string(), "output");
    }
}
