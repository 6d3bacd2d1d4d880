// crates/statechart-core/src/core/definition.rs
// ============================================================================
// Module: Statechart Machine Definition
// Description: Compiled, immutable state-definition tree with resolved links.
// Purpose: Provide the handle-addressed transition graph the engine executes.
// Dependencies: crate::core::{config, hashing, identifiers, registry}, serde_json
// ============================================================================

//! ## Overview
//! The machine definition is the compiled root of a statechart: an arena of
//! state-definition nodes addressed by compact integer handles, with
//! parent/child links, resolved transition targets, and a snapshot of the
//! behavior registry. Definitions are created once by the compiler, validated,
//! and shared immutably by any number of runtime states.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::core::hashing::DefinitionDigest;
use crate::core::identifiers::EventType;
use crate::core::identifiers::MachineId;
use crate::core::identifiers::ScenarioName;
use crate::core::identifiers::StateId;
use crate::core::registry::BehaviorRegistry;

// ============================================================================
// SECTION: State Handles
// ============================================================================

/// Compact arena handle addressing a state definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateHandle(u32);

impl StateHandle {
    /// Creates a handle from an arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the arena index of the handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// SECTION: Behavior Specs
// ============================================================================

/// Parsed behavior reference of the form `name` or `name:arg1,arg2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorSpec {
    /// Registered behavior name.
    pub name: String,
    /// Positional argument strings following the colon.
    pub args: Vec<String>,
}

impl BehaviorSpec {
    /// Parses a behavior spec string.
    ///
    /// Everything before the first colon is the behavior name; the remainder
    /// splits on commas into positional argument strings.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((name, args)) => Self {
                name: name.to_string(),
                args: args.split(',').map(str::to_string).collect(),
            },
            None => Self {
                name: spec.to_string(),
                args: Vec::new(),
            },
        }
    }
}

impl fmt::Display for BehaviorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.args.join(","))
        }
    }
}

// ============================================================================
// SECTION: State Definitions
// ============================================================================

/// Structural kind of a state definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Pure leaf state.
    Atomic,
    /// State with children and an initial pointer.
    Compound,
    /// Orthogonal state whose children are concurrently active regions.
    Parallel,
    /// Terminal state with no children and no transitions.
    Final,
}

/// Node in the compiled state hierarchy.
///
/// # Invariants
/// - ATOMIC and FINAL nodes have no children; COMPOUND nodes have a resolved
///   `initial` child; PARALLEL nodes have compound children and no `initial`.
/// - `id` is unique within the definition's id map.
#[derive(Debug)]
pub struct StateDefinition {
    /// Local key of the node within its parent.
    pub key: String,
    /// Fully-qualified, delimiter-joined identifier.
    pub id: StateId,
    /// Dotted route excluding the machine id; empty for the root.
    pub route: String,
    /// Parent back-reference; `None` for the root.
    pub parent: Option<StateHandle>,
    /// Children in declaration order.
    pub children: Vec<StateHandle>,
    /// Structural kind.
    pub kind: StateKind,
    /// Resolved initial child for compound nodes.
    pub initial: Option<StateHandle>,
    /// Ordered entry action specs.
    pub entry: Vec<BehaviorSpec>,
    /// Ordered exit action specs.
    pub exit: Vec<BehaviorSpec>,
    /// Transitions keyed by event type.
    pub transitions: BTreeMap<EventType, TransitionDefinition>,
    /// True for direct children of a parallel state.
    pub is_region: bool,
    /// Opaque user metadata surfaced unchanged.
    pub meta: Option<Value>,
}

impl StateDefinition {
    /// Returns the transition handling an event type, when defined here.
    #[must_use]
    pub fn transition_for(&self, event_type: &EventType) -> Option<&TransitionDefinition> {
        self.transitions.get(event_type)
    }

    /// Returns true when the node is a leaf the active set may contain.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    /// Returns true when the node is a final state.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self.kind, StateKind::Final)
    }
}

// ============================================================================
// SECTION: Transition Definitions
// ============================================================================

/// Named reaction to an event at a state.
///
/// # Invariants
/// - At least one branch; always-transitions carry the `@always` event type.
#[derive(Debug)]
pub struct TransitionDefinition {
    /// Source state of the transition.
    pub source: StateHandle,
    /// Event type the transition reacts to.
    pub event_type: EventType,
    /// Arbitrated branches in declaration order.
    pub branches: Vec<TransitionBranch>,
    /// True for eventless always-transitions.
    pub is_always: bool,
    /// True when any branch declares guards.
    pub is_guarded: bool,
}

/// One arbitrated option under a transition.
#[derive(Debug)]
pub struct TransitionBranch {
    /// Resolved target handle; `None` for target-less self-transitions.
    pub target: Option<StateHandle>,
    /// Ordered guard specs evaluated with short-circuit AND.
    pub guards: Vec<BehaviorSpec>,
    /// Ordered calculator specs run before the guards.
    pub calculators: Vec<BehaviorSpec>,
    /// Ordered action specs run when the branch is taken.
    pub actions: Vec<BehaviorSpec>,
    /// Optional human-readable description.
    pub description: Option<String>,
}

// ============================================================================
// SECTION: Machine Definition
// ============================================================================

/// Compiled root of a statechart.
///
/// # Invariants
/// - Every transition target resolves to a known state; structural shape
///   rules hold for every node (enforced by the compiler).
/// - Immutable after compilation; shared by many runtime states.
#[derive(Debug)]
pub struct MachineDefinition {
    /// Machine identifier.
    pub id: MachineId,
    /// Optional machine version label.
    pub version: Option<String>,
    /// Path delimiter joining state ids.
    pub delimiter: String,
    /// Arena of state definitions; the root occupies handle 0.
    pub(crate) states: Vec<StateDefinition>,
    /// Fully-qualified id to handle map.
    pub(crate) id_map: BTreeMap<String, StateHandle>,
    /// Flat set of user-visible event names.
    pub events: BTreeSet<EventType>,
    /// Behavior registry snapshot resolved against during steps.
    pub registry: BehaviorRegistry,
    /// Default context values from the machine config.
    pub context_defaults: BTreeMap<String, Value>,
    /// Result extractor spec, when configured.
    pub result: Option<BehaviorSpec>,
    /// Whether scenario overlay resolution is enabled.
    pub scenarios_enabled: bool,
    /// Scenario overlay roots keyed by scenario name.
    pub scenarios: BTreeMap<ScenarioName, StateHandle>,
    /// Canonical digest of the source configuration.
    pub config_hash: DefinitionDigest,
    /// Opaque machine-level metadata.
    pub meta: Option<Value>,
}

impl MachineDefinition {
    /// Returns the root state handle.
    #[must_use]
    pub const fn root(&self) -> StateHandle {
        StateHandle::new(0)
    }

    /// Returns the state definition for a handle.
    ///
    /// # Panics
    ///
    /// Panics when the handle does not belong to this definition; handles are
    /// only produced by this definition's compiler and id map.
    #[must_use]
    pub fn state(&self, handle: StateHandle) -> &StateDefinition {
        &self.states[handle.index()]
    }

    /// Resolves a fully-qualified id to a state handle.
    #[must_use]
    pub fn resolve_id(&self, id: &str) -> Option<StateHandle> {
        self.id_map.get(id).copied()
    }

    /// Returns the number of compiled state definitions.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Returns the chain of handles from a node up to the root, inclusive.
    #[must_use]
    pub fn path_to_root(&self, handle: StateHandle) -> Vec<StateHandle> {
        let mut chain = vec![handle];
        let mut cursor = handle;
        while let Some(parent) = self.state(cursor).parent {
            chain.push(parent);
            cursor = parent;
        }
        chain
    }

    /// Returns true when `ancestor` lies on `node`'s path to the root.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: StateHandle, node: StateHandle) -> bool {
        let mut cursor = self.state(node).parent;
        while let Some(handle) = cursor {
            if handle == ancestor {
                return true;
            }
            cursor = self.state(handle).parent;
        }
        false
    }

    /// Finds the direct child of a node with the given key.
    #[must_use]
    pub fn find_child(&self, handle: StateHandle, key: &str) -> Option<StateHandle> {
        self.state(handle)
            .children
            .iter()
            .copied()
            .find(|child| self.state(*child).key == key)
    }

    /// Returns the flat set of user-visible event names.
    #[must_use]
    pub const fn event_names(&self) -> &BTreeSet<EventType> {
        &self.events
    }
}
