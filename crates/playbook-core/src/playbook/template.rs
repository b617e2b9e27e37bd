//! Template resolution for step inputs.
//!
//! Two dialects feed a step's resolved inputs:
//!
//! - **Step-internal**: `{{ expr }}` inside any string of `inputs`, resolved
//!   against the `input`, `step`, `previous`, `context`, `item` and `index`
//!   namespaces. A string that is exactly one expression becomes the
//!   referenced value itself; otherwise each expression is substituted with
//!   its display form (containers as compact JSON).
//! - **Workflow mapping**: `input_mapping` values `$previous.<id>.outputs.<f>`
//!   or `$context.<key>`. Mapped values override same-named inputs.
//!
//! Unresolvable references are left literal in lenient mode and rejected in
//! strict mode.

use playbook_types::config::TemplateMode;
use playbook_types::playbook::StepDefinition;
use serde_json::{Map, Value};
use thiserror::Error;

use super::context::{Scope, value_to_string};

/// Errors from template resolution (strict mode only).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unresolved template reference '{reference}'")]
    Unresolved { reference: String },

    #[error("invalid input mapping for '{key}': '{expression}' must start with $previous. or $context.")]
    InvalidMapping { key: String, expression: String },
}

/// Resolves templates according to a [`TemplateMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine {
    mode: TemplateMode,
}

impl TemplateEngine {
    pub fn new(mode: TemplateMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TemplateMode {
        self.mode
    }

    /// Resolve a step's inputs, then apply its input mapping on top.
    pub fn resolve_inputs(
        &self,
        step: &StepDefinition,
        scope: &Scope<'_>,
    ) -> Result<Map<String, Value>, TemplateError> {
        let mut resolved = Map::new();
        for (key, value) in &step.inputs {
            resolved.insert(key.clone(), self.resolve_value(value, scope)?);
        }

        let mut mapped: Vec<(&String, &String)> = step.input_mapping.iter().collect();
        mapped.sort();
        for (key, expression) in mapped {
            resolved.insert(key.clone(), self.resolve_mapping(key, expression, scope)?);
        }
        Ok(resolved)
    }

    /// Resolve every string inside a JSON value, recursively.
    pub fn resolve_value(&self, value: &Value, scope: &Scope<'_>) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => self.resolve_string(s, scope),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v, scope)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve the `{{ }}` expressions in one string.
    pub fn resolve_string(&self, template: &str, scope: &Scope<'_>) -> Result<Value, TemplateError> {
        if let Some(expr) = whole_expression(template) {
            return match scope.lookup(expr) {
                Some(value) => Ok(value),
                None => self.unresolved(expr).map(|()| Value::String(template.to_string())),
            };
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let end = start + 2 + len + 2;
            let expr = rest[start + 2..end - 2].trim();

            out.push_str(&rest[..start]);
            match scope.lookup(expr) {
                Some(value) => out.push_str(&value_to_string(&value)),
                None => {
                    self.unresolved(expr)?;
                    out.push_str(&rest[start..end]);
                }
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }

    /// Resolve one `input_mapping` expression.
    pub fn resolve_mapping(
        &self,
        key: &str,
        expression: &str,
        scope: &Scope<'_>,
    ) -> Result<Value, TemplateError> {
        let trimmed = expression.trim();
        let path = match trimmed.strip_prefix('$') {
            Some(p) if p.starts_with("previous.") || p.starts_with("context.") => p,
            _ => {
                return Err(TemplateError::InvalidMapping {
                    key: key.to_string(),
                    expression: expression.to_string(),
                });
            }
        };
        match scope.lookup(path) {
            Some(value) => Ok(value),
            None => self
                .unresolved(trimmed)
                .map(|()| Value::String(expression.to_string())),
        }
    }

    fn unresolved(&self, reference: &str) -> Result<(), TemplateError> {
        match self.mode {
            TemplateMode::Lenient => {
                tracing::warn!(reference, "unresolved template reference left literal");
                Ok(())
            }
            TemplateMode::Strict => Err(TemplateError::Unresolved {
                reference: reference.to_string(),
            }),
        }
    }
}

/// The inner expression when `template` is exactly one `{{ expr }}`.
fn whole_expression(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
