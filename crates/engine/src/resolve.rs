//! # Run context and template resolution
//!
//! [`RunContext`] is the explicit state threaded through a run: resolved input
//! values keyed by field name, results of completed steps keyed by step key,
//! the ordered list of completed step keys, and the process environment made
//! available to templates.
//!
//! Field defaults and command action arguments use the `${{ ... }}` template
//! syntax:
//!
//! - `${{ env.VARIABLE_NAME }}` - environment variable lookup
//! - `${{ inputs.field_name }}` - resolved input value
//! - `${{ steps.step_key.output.field }}` - result of a completed step (`output` is optional)
//!
//! ```rust
//! use skyward_engine::resolve::{RunContext, interpolate_value};
//! use serde_json::json;
//!
//! let mut context = RunContext::default();
//! context.inputs.insert("app_name".into(), json!("mysite"));
//! context.record_step("create_database", json!({ "connection": "proj:us-west1:mysite-instance" }));
//!
//! let value = json!({
//!     "instance": "${{ inputs.app_name }}-instance",
//!     "connection": "${{ steps.create_database.connection }}"
//! });
//! let resolved = interpolate_value(&value, &context);
//! assert_eq!(resolved["instance"], "mysite-instance");
//! assert_eq!(resolved["connection"], "proj:us-west1:mysite-instance");
//! ```

use std::collections::HashMap;

use serde_json::Value;

/// Explicit state for one invocation, passed to every action call.
#[derive(Debug, Default, Clone)]
pub struct RunContext {
    /// Environment variables exposed to templates as `env.*`.
    pub environment_variables: HashMap<String, String>,
    /// Resolved input values shared across steps, keyed by field name.
    pub inputs: serde_json::Map<String, Value>,
    /// Results of completed steps, keyed by step key.
    pub steps: HashMap<String, Value>,
    /// Step keys completed in this run or carried over from a prior one, in completion order.
    pub completed: Vec<String>,
}

impl RunContext {
    pub fn with_environment(environment_variables: HashMap<String, String>) -> Self {
        Self {
            environment_variables,
            ..Self::default()
        }
    }

    /// Store a step result and mark the step completed.
    pub fn record_step(&mut self, step_key: &str, result: Value) {
        self.steps.insert(step_key.to_string(), result);
        if !self.is_completed(step_key) {
            self.completed.push(step_key.to_string());
        }
    }

    pub fn is_completed(&self, step_key: &str) -> bool {
        self.completed.iter().any(|key| key == step_key)
    }

    /// Returns the input as text, when it is a string.
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(Value::as_str)
    }
}

/// Recursively interpolates all template expressions in a JSON value.
///
/// Expressions that cannot be resolved are replaced with an empty string.
pub fn interpolate_value(value: &Value, context: &RunContext) -> Value {
    match value {
        Value::String(string_value) => Value::String(interpolate_string(string_value, context)),
        Value::Array(array_values) => Value::Array(
            array_values
                .iter()
                .map(|array_value| interpolate_value(array_value, context))
                .collect(),
        ),
        Value::Object(object_map) => {
            let mut interpolated_map = serde_json::Map::new();
            for (key, value) in object_map.iter() {
                interpolated_map.insert(key.clone(), interpolate_value(value, context));
            }
            Value::Object(interpolated_map)
        }
        _ => value.clone(),
    }
}

/// Interpolates template expressions in a string, replacing unresolved ones with nothing.
pub fn interpolate_string(input_string: &str, context: &RunContext) -> String {
    scan_templates(input_string, |expression| Ok::<_, ()>(resolve_expression(expression, context).unwrap_or_default()))
        .unwrap_or_else(|_| input_string.to_string())
}

/// Interpolates template expressions, failing with the first expression that cannot be resolved.
pub fn try_interpolate_string(input_string: &str, context: &RunContext) -> Result<String, String> {
    scan_templates(input_string, |expression| {
        resolve_expression(expression, context).ok_or_else(|| expression.to_string())
    })
}

/// Names of the input fields referenced by `${{ inputs.<name> }}` expressions, in order of appearance.
pub fn referenced_inputs(input_string: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let _ = scan_templates(input_string, |expression| {
        if let Some(rest) = expression.strip_prefix("inputs.")
            && let Some(name) = rest.split('.').next()
            && !name.is_empty()
            && !names.iter().any(|existing| existing == name)
        {
            names.push(name.to_string());
        }
        Ok::<_, ()>(String::new())
    });
    names
}

/// Walks `${{ ... }}` markers, substituting whatever `resolve` yields for each expression.
///
/// A marker without a closing `}}` is preserved verbatim along with the rest of the string.
fn scan_templates<E>(input_string: &str, mut resolve: impl FnMut(&str) -> Result<String, E>) -> Result<String, E> {
    let mut output_string = String::with_capacity(input_string.len());
    let mut remaining_string = input_string;

    while let Some(template_start) = remaining_string.find("${{") {
        let (string_before_template, string_after_template) = remaining_string.split_at(template_start);
        output_string.push_str(string_before_template);

        let Some(template_end_index) = string_after_template.find("}}") else {
            output_string.push_str(string_after_template);
            return Ok(output_string);
        };
        let template_expression = string_after_template[3..template_end_index].trim();
        output_string.push_str(&resolve(template_expression)?);
        remaining_string = &string_after_template[template_end_index + 2..];
    }

    output_string.push_str(remaining_string);
    Ok(output_string)
}

/// Resolves a template expression to a string value using the run context.
fn resolve_expression(expression: &str, context: &RunContext) -> Option<String> {
    if let Some(variable_name) = expression.strip_prefix("env.") {
        return context.environment_variables.get(variable_name).cloned();
    }

    if let Some(remaining_expression) = expression.strip_prefix("inputs.") {
        let mut expression_parts = remaining_expression.split('.');
        let input_name = expression_parts.next()?;
        let input_value = context.inputs.get(input_name)?;
        let remaining_parts: Vec<&str> = expression_parts.collect();
        return navigate_json_path(input_value, &remaining_parts);
    }

    if let Some(remaining_expression) = expression.strip_prefix("steps.") {
        let mut expression_parts = remaining_expression.split('.');
        let step_key = expression_parts.next()?;
        let step_value = context.steps.get(step_key)?;
        let remaining_parts: Vec<&str> = expression_parts.collect();

        let path_parts = if matches!(remaining_parts.first().copied(), Some("output")) {
            &remaining_parts[1..]
        } else {
            &remaining_parts[..]
        };
        return navigate_json_path(step_value, path_parts);
    }

    None
}

/// Navigates object fields and numeric array indices; `None` when a segment is missing.
fn navigate_json_path(root_value: &Value, path_parts: &[&str]) -> Option<String> {
    let mut current_value = root_value;
    for path_part in path_parts {
        current_value = match current_value {
            Value::Object(object_map) => object_map.get(*path_part)?,
            Value::Array(array_values) => array_values.get(path_part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(format_json_value(current_value))
}

/// Formats a JSON value for substitution: strings as-is, null as empty, containers as JSON.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(bool_value) => bool_value.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}
