// crates/statechart-core/src/core/config.rs
// ============================================================================
// Module: Statechart Machine Configuration
// Description: Declarative machine, state, and transition configuration.
// Purpose: Define the raw config shape consumed by the definition compiler.
// Dependencies: indexmap, serde, serde_json
// ============================================================================

//! ## Overview
//! Machine configurations are the declarative input to the definition
//! compiler: a nested mapping of state name to state config, plus
//! machine-level options. Configurations are untrusted input; all structural
//! validation happens during compilation, not here.
//!
//! Children and transition maps preserve insertion order because declaration
//! order is semantic: it drives deterministic traversal, branch arbitration,
//! and parallel region ordering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Machine Configuration
// ============================================================================

/// Default machine identifier used when the config does not name one.
pub const DEFAULT_MACHINE_ID: &str = "machine";

/// Default path delimiter joining state ids.
pub const DEFAULT_DELIMITER: &str = ".";

/// Declarative machine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    /// Machine identifier; defaults to `machine`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Optional machine version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Path delimiter joining state ids; defaults to `.`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// Default context shape applied when a run starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<IndexMap<String, Value>>,
    /// Initial child state of the machine root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Child state configurations in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub states: IndexMap<String, StateNodeConfig>,
    /// Behavior name of the machine result extractor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Enables scenario overlay resolution at step time.
    #[serde(default)]
    pub scenarios_enabled: bool,
    /// Scenario overlay sub-configurations keyed by scenario name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scenarios: IndexMap<String, ScenarioConfig>,
    /// Opaque machine-level metadata surfaced unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Scenario overlay sub-configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Optional initial child of the overlay subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Overlay state configurations in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub states: IndexMap<String, StateNodeConfig>,
}

// ============================================================================
// SECTION: State Configuration
// ============================================================================

/// Explicit state type markers recognized in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateTypeConfig {
    /// Pure leaf state.
    Atomic,
    /// State with children and an `initial` pointer.
    Compound,
    /// Orthogonal state whose children are concurrently active regions.
    Parallel,
    /// Terminal state with no children and no transitions.
    Final,
}

/// Declarative configuration for one state node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateNodeConfig {
    /// Optional explicit id overriding the derived path id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Explicit state type; inferred from shape when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub state_type: Option<StateTypeConfig>,
    /// Initial child name; required for compound, forbidden for parallel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Child state configurations in declaration order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub states: IndexMap<String, StateNodeConfig>,
    /// Entry action behavior specs (scalar or list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<BehaviorSpecList>,
    /// Exit action behavior specs (scalar or list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<BehaviorSpecList>,
    /// Transitions keyed by event type in declaration order.
    ///
    /// A `null` value compiles to a target-less self-transition.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub on: IndexMap<String, Option<TransitionValueConfig>>,
    /// Shorthand for an `@always` eventless transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<TransitionValueConfig>,
    /// Shorthand for the completion transition of this state.
    #[serde(default, rename = "onDone", skip_serializing_if = "Option::is_none")]
    pub on_done: Option<TransitionValueConfig>,
    /// Opaque user metadata surfaced unchanged on the definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ============================================================================
// SECTION: Transition Configuration
// ============================================================================

/// Transition value accepted under an `on` event key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionValueConfig {
    /// Bare target state name.
    Target(String),
    /// Single guarded branch mapping.
    Branch(TransitionBranchConfig),
    /// Ordered list of guarded branch mappings.
    Branches(Vec<TransitionBranchConfig>),
}

/// One arbitrated branch of a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionBranchConfig {
    /// Optional target state name; absent means self-transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Guard behavior specs evaluated with short-circuit AND.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guards: Option<BehaviorSpecList>,
    /// Calculator behavior specs run before the guards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculators: Option<BehaviorSpecList>,
    /// Action behavior specs run when the branch is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<BehaviorSpecList>,
    /// Optional human-readable branch description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// SECTION: Behavior Spec Lists
// ============================================================================

/// Scalar-or-list of behavior spec strings.
///
/// Configuration accepts either a single behavior spec or an ordered list;
/// both normalize to an ordered slice during compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BehaviorSpecList {
    /// Single behavior spec.
    One(String),
    /// Ordered list of behavior specs.
    Many(Vec<String>),
}

impl BehaviorSpecList {
    /// Returns the specs as an ordered slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(spec) => std::slice::from_ref(spec),
            Self::Many(specs) => specs.as_slice(),
        }
    }
}

/// Normalizes an optional scalar-or-list into an owned ordered vector.
#[must_use]
pub fn normalize_specs(list: Option<&BehaviorSpecList>) -> Vec<String> {
    list.map_or_else(Vec::new, |list| list.as_slice().to_vec())
}
