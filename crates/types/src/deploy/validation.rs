//! Validation helpers for operator-supplied field values.
//!
//! Values reach these checks from prompts, preset configuration, and prior
//! progress records alike, so every source obeys the same declarative rules.

use regex::Regex;
use serde_json::Value;

use super::InputValidation;

/// Validate a JSON candidate against declarative field rules.
///
/// - Required fields reject `null` and blank strings.
/// - Enumerations must include the candidate.
/// - Patterns, minimum length, and maximum length only apply to strings.
pub fn validate_candidate_value(candidate: &Value, validation: &InputValidation) -> Result<(), String> {
    if validation.required && is_blank(candidate) {
        return Err("a value is required".to_string());
    }

    if !validation.allowed_values.is_empty() {
        let matches_allowed_value = validation
            .allowed_values
            .iter()
            .any(|allowed| json_values_match(allowed, candidate));
        if !matches_allowed_value {
            return Err("value is not in the allowed set".to_string());
        }
    }

    match candidate {
        Value::String(text) => {
            if let Some(min_length) = validation.min_length
                && text.chars().count() < min_length
            {
                return Err(format!("value must be at least {} characters", min_length));
            }

            if let Some(max_length) = validation.max_length
                && text.chars().count() > max_length
            {
                return Err(format!("value must be at most {} characters", max_length));
            }

            if let Some(pattern) = &validation.pattern {
                let regex = Regex::new(pattern).map_err(|error| format!("invalid pattern '{}': {}", pattern, error))?;
                if !regex.is_match(text) {
                    return Err(format!("value must match the pattern {}", pattern));
                }
            }
            Ok(())
        }
        Value::Null => Ok(()),
        _ => {
            if validation.pattern.is_some() || validation.min_length.is_some() || validation.max_length.is_some() {
                Err("value must be text to satisfy validation rules".to_string())
            } else {
                Ok(())
            }
        }
    }
}

fn is_blank(candidate: &Value) -> bool {
    match candidate {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn json_values_match(expected: &Value, candidate: &Value) -> bool {
    if expected == candidate {
        return true;
    }
    match (expected, candidate) {
        (Value::String(expected_text), other) if !other.is_string() => expected_text == &other.to_string(),
        (other, Value::String(candidate_text)) => match serde_json::from_str::<Value>(candidate_text) {
            Ok(parsed) => other == &parsed,
            Err(_) => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_identifier_pattern_accepts_valid_ids() {
        let validation = InputValidation::required().with_pattern("^[a-z][a-z0-9-]{5,29}$");

        assert!(validate_candidate_value(&Value::String("my-project-42".to_string()), &validation).is_ok());
        assert!(validate_candidate_value(&Value::String("1project".to_string()), &validation).is_err());
        assert!(validate_candidate_value(&Value::String("short".to_string()), &validation).is_err());
    }

    #[test]
    fn required_rejects_blank_values() {
        let validation = InputValidation::required();

        let error = validate_candidate_value(&Value::String("   ".to_string()), &validation).expect_err("blank");
        assert_eq!(error, "a value is required");
        assert!(validate_candidate_value(&Value::Null, &validation).is_err());
    }

    #[test]
    fn length_bounds_count_characters() {
        let validation = InputValidation::default().with_length(Some(4), Some(6));

        assert!(validate_candidate_value(&Value::String("abc".to_string()), &validation).is_err());
        assert!(validate_candidate_value(&Value::String("åäöü".to_string()), &validation).is_ok());
        assert!(validate_candidate_value(&Value::String("abcdefg".to_string()), &validation).is_err());
    }

    #[test]
    fn numeric_candidate_with_allowed_values_passes() {
        let validation = InputValidation {
            allowed_values: vec![Value::Number(serde_json::Number::from(42))],
            ..InputValidation::default()
        };

        assert!(validate_candidate_value(&Value::Number(serde_json::Number::from(42)), &validation).is_ok());
        assert!(validate_candidate_value(&Value::String("42".to_string()), &validation).is_ok());
        assert!(validate_candidate_value(&Value::Number(serde_json::Number::from(7)), &validation).is_err());
    }

    #[test]
    fn non_string_candidate_rejected_when_text_rules_present() {
        let validation = InputValidation::default().with_length(Some(2), None);
        assert!(validate_candidate_value(&Value::Number(serde_json::Number::from(12)), &validation).is_err());
    }
}
