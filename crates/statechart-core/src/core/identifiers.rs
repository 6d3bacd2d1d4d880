// crates/statechart-core/src/core/identifiers.rs
// ============================================================================
// Module: Statechart Identifiers
// Description: Canonical opaque identifiers for machines, states, and runs.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! the interpreter. Identifiers are opaque and serialize as strings.
//! Validation is handled at compilation or runtime boundaries rather than
//! within these simple wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Machine identifier prefixed onto every fully-qualified state id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Creates a new machine identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MachineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MachineId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Fully-qualified state identifier (machine id joined with the state path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    /// Creates a new state identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StateId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Event type identifier carried by external and internal events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Creates a new event type.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    /// Returns the event type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the event type is interpreter-internal.
    ///
    /// Internal event types carry the `@` prefix (`@always`, `@init`, and
    /// synthesized completion events) and are never user-dispatchable.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.0.starts_with('@')
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Root event identifier anchoring every record of a run.
///
/// The root event id is assigned by the caller when a run starts and is the
/// restoration key understood by history stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootEventId(String);

impl RootEventId {
    /// Creates a new root event identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RootEventId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RootEventId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Name of a scenario overlay compiled into a machine definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioName(String);

impl ScenarioName {
    /// Creates a new scenario name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScenarioName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ScenarioName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScenarioName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
