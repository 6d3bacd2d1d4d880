// crates/statechart-core/src/core/event.rs
// ============================================================================
// Module: Statechart Events
// Description: External and internal events plus declarative payload rules.
// Purpose: Define the event shapes dispatched into the step engine.
// Dependencies: crate::core::{context, identifiers}, serde, serde_json
// ============================================================================

//! ## Overview
//! Events trigger run-to-completion steps. Callers supply either raw
//! `{type, payload}` values or already-validated [`Event`]s; raw values are
//! validated against the payload rules their event definition declares before
//! dispatch. Interpreter-internal event types carry the `@` prefix and are
//! synthesized by the engine, never by callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::context::ValueKind;
use crate::core::identifiers::EventType;
use crate::core::identifiers::StateId;

// ============================================================================
// SECTION: Internal Event Types
// ============================================================================

/// Event type of the eventless always-transition.
pub const ALWAYS_EVENT: &str = "@always";

/// Event type synthesized when a run starts without a caller event.
pub const INIT_EVENT: &str = "@init";

/// Prefix of synthesized completion event types.
pub const DONE_EVENT_PREFIX: &str = "@done.";

/// Returns the completion event type for a state.
#[must_use]
pub fn completion_event(state_id: &StateId) -> EventType {
    EventType::new(format!("{DONE_EVENT_PREFIX}{state_id}"))
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// A validated event attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    pub event_type: EventType,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Event {
    /// Creates an event without a payload.
    #[must_use]
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
        }
    }

    /// Creates an event with a payload.
    #[must_use]
    pub fn with_payload(event_type: impl Into<EventType>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Some(payload),
        }
    }
}

/// Event input accepted by the step engine and the raise handle.
///
/// Raw inputs are validated against registered payload rules before dispatch;
/// validated events pass through unchanged. Deserialized inputs are always
/// raw, so documents never bypass payload validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventInput {
    /// Raw `{type, payload}` value pending validation.
    Raw {
        /// Event type.
        event_type: EventType,
        /// Optional structured payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Already-validated event.
    Validated(Event),
}

impl EventInput {
    /// Returns the event type of the input.
    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        match self {
            Self::Validated(event) => &event.event_type,
            Self::Raw {
                event_type, ..
            } => event_type,
        }
    }
}

impl From<Event> for EventInput {
    fn from(event: Event) -> Self {
        Self::Validated(event)
    }
}

impl From<EventType> for EventInput {
    fn from(event_type: EventType) -> Self {
        Self::Raw {
            event_type,
            payload: None,
        }
    }
}

impl From<&str> for EventInput {
    fn from(event_type: &str) -> Self {
        Self::Raw {
            event_type: EventType::new(event_type),
            payload: None,
        }
    }
}

// ============================================================================
// SECTION: Event Definitions
// ============================================================================

/// Declarative payload rule for one top-level payload key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRule {
    /// Payload key addressed by the rule.
    pub key: String,
    /// Expected value kind.
    pub kind: ValueKind,
    /// Whether the key must be present.
    pub required: bool,
}

/// Self-describing event type registered with the behavior registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Event type the definition describes.
    pub event_type: EventType,
    /// Payload rules checked before dispatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<PayloadRule>,
    /// Whether records for this event should be persisted.
    #[serde(default = "default_should_log")]
    pub should_log: bool,
}

/// Default `should_log` value for event definitions.
const fn default_should_log() -> bool {
    true
}

impl EventDefinition {
    /// Creates a definition with no payload rules.
    #[must_use]
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            rules: Vec::new(),
            should_log: true,
        }
    }

    /// Adds a payload rule.
    #[must_use]
    pub fn with_rule(mut self, key: impl Into<String>, kind: ValueKind, required: bool) -> Self {
        self.rules.push(PayloadRule {
            key: key.into(),
            kind,
            required,
        });
        self
    }

    /// Marks records for this event as non-persisted.
    #[must_use]
    pub const fn without_logging(mut self) -> Self {
        self.should_log = false;
        self
    }

    /// Validates a payload against the declared rules.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for the first rule violation in
    /// declaration order.
    pub fn validate(&self, payload: Option<&Value>) -> Result<(), ValidationError> {
        for rule in &self.rules {
            let value = payload.and_then(|payload| payload.get(&rule.key));
            match value {
                Some(value) => {
                    if !rule.kind.matches(value) {
                        return Err(ValidationError::PayloadKindMismatch {
                            event_type: self.event_type.clone(),
                            key: rule.key.clone(),
                            expected: rule.kind.label(),
                        });
                    }
                }
                None => {
                    if rule.required {
                        return Err(ValidationError::MissingPayloadKey {
                            event_type: self.event_type.clone(),
                            key: rule.key.clone(),
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

/// Validation failures surfaced to the caller before or during a step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required payload key is absent.
    #[error("event `{event_type}` payload is missing required key `{key}`")]
    MissingPayloadKey {
        /// Event type under validation.
        event_type: EventType,
        /// Missing payload key.
        key: String,
    },
    /// A payload value does not match its declared kind.
    #[error("event `{event_type}` payload key `{key}` does not match expected kind `{expected}`")]
    PayloadKindMismatch {
        /// Event type under validation.
        event_type: EventType,
        /// Offending payload key.
        key: String,
        /// Expected kind label.
        expected: &'static str,
    },
    /// A validation-flavored guard failed.
    #[error("guard `{guard}` failed: {message}")]
    Guard {
        /// Guard behavior name.
        guard: String,
        /// Human-readable failure message exposed by the guard.
        message: String,
    },
}
