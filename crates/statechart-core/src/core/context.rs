// crates/statechart-core/src/core/context.rs
// ============================================================================
// Module: Statechart Context Store
// Description: Typed key/value bag carried across a run-to-completion step.
// Purpose: Provide scoped context mutation with schema validation and deltas.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The context store is the mutable key/value bag behaviors read and write
//! during a step. An optional schema declares per-field kind and requiredness
//! plus default values; the engine validates the store at machine start and
//! after each mutation cluster so invariant violations surface at the point
//! they occur.
//!
//! Deltas between snapshots feed the `context_delta` field of internal event
//! records, which is what restoration folds to rebuild a context.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Value Kinds
// ============================================================================

/// Declarative JSON value kind for schema fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool,
    /// JSON integer (no fractional part).
    Integer,
    /// Any JSON number.
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Any JSON value.
    Any,
}

impl ValueKind {
    /// Returns true when the value matches this kind.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    /// Returns a stable label for error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

// ============================================================================
// SECTION: Context Schema
// ============================================================================

/// Validation rule for one schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Expected value kind.
    pub kind: ValueKind,
    /// Whether the field must be present.
    pub required: bool,
    /// Default value installed at machine start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Typed context shape with per-field validation rules.
///
/// # Invariants
/// - Field order is canonical (sorted by key) for deterministic validation
///   output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSchema {
    /// Field rules keyed by context key.
    pub fields: BTreeMap<String, FieldRule>,
}

impl ContextSchema {
    /// Creates an empty schema.
    #[must_use]
    pub const fn new(fields: BTreeMap<String, FieldRule>) -> Self {
        Self {
            fields,
        }
    }

    /// Returns the default values declared by the schema.
    #[must_use]
    pub fn defaults(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .filter_map(|(key, rule)| rule.default.clone().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Validates a value map against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] for the first missing required field or kind
    /// mismatch in canonical field order.
    pub fn validate(&self, values: &BTreeMap<String, Value>) -> Result<(), ContextError> {
        for (key, rule) in &self.fields {
            match values.get(key) {
                Some(value) => {
                    if !rule.kind.matches(value) {
                        return Err(ContextError::KindMismatch {
                            key: key.clone(),
                            expected: rule.kind.label(),
                        });
                    }
                }
                None => {
                    if rule.required {
                        return Err(ContextError::MissingRequired {
                            key: key.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by context validation and key requirements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A schema-required field is absent.
    #[error("context field `{key}` is required but missing")]
    MissingRequired {
        /// Missing field key.
        key: String,
    },
    /// A field value does not match its declared kind.
    #[error("context field `{key}` does not match expected kind `{expected}`")]
    KindMismatch {
        /// Offending field key.
        key: String,
        /// Expected kind label.
        expected: &'static str,
    },
    /// A behavior's required context key is absent.
    #[error("behavior `{behavior}` requires context key `{key}`")]
    MissingBehaviorKey {
        /// Behavior name that declared the requirement.
        behavior: String,
        /// Missing context key.
        key: String,
    },
}

// ============================================================================
// SECTION: Context Store
// ============================================================================

/// Mutable key/value bag carried with a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Current values in canonical key order.
    values: BTreeMap<String, Value>,
    /// Optional schema applied after mutation clusters.
    #[serde(skip)]
    schema: Option<Arc<ContextSchema>>,
}

impl Context {
    /// Creates a context from initial values with no schema.
    #[must_use]
    pub const fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            schema: None,
        }
    }

    /// Creates a context seeded from schema defaults.
    #[must_use]
    pub fn from_schema(schema: Arc<ContextSchema>) -> Self {
        Self {
            values: schema.defaults(),
            schema: Some(schema),
        }
    }

    /// Attaches a schema to this context.
    pub fn attach_schema(&mut self, schema: Arc<ContextSchema>) {
        self.schema = Some(schema);
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets the value for a key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Removes a key, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Returns true when the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the current values in canonical order.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Returns a snapshot of the current values.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }

    /// Validates the current values against the attached schema, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when a schema rule is violated.
    pub fn validate(&self) -> Result<(), ContextError> {
        match &self.schema {
            Some(schema) => schema.validate(&self.values),
            None => Ok(()),
        }
    }

    /// Ensures all keys required by a behavior are present.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingBehaviorKey`] for the first absent key.
    pub fn ensure_keys(&self, behavior: &str, keys: &[&str]) -> Result<(), ContextError> {
        for key in keys {
            if !self.values.contains_key(*key) {
                return Err(ContextError::MissingBehaviorKey {
                    behavior: behavior.to_string(),
                    key: (*key).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Applies a delta produced by [`context_delta`].
    pub fn apply_delta(&mut self, delta: &BTreeMap<String, Value>) {
        for (key, value) in delta {
            if value.is_null() {
                self.values.remove(key);
            } else {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// SECTION: Delta Computation
// ============================================================================

/// Computes the delta between two context snapshots.
///
/// Changed and added keys map to their new value; removed keys encode as JSON
/// null. Returns `None` when the snapshots are identical.
#[must_use]
pub fn context_delta(
    before: &BTreeMap<String, Value>,
    after: &BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    let mut delta = BTreeMap::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            delta.insert(key.clone(), value.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            delta.insert(key.clone(), Value::Null);
        }
    }
    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}
