// crates/statechart-core/src/core/compiler.rs
// ============================================================================
// Module: Statechart Definition Compiler
// Description: Compilation of declarative configs into machine definitions.
// Purpose: Build the state arena, resolve transitions, and validate shape.
// Dependencies: crate::core::{config, context, definition, event, hashing,
// identifiers, registry}, indexmap, thiserror
// ============================================================================

//! ## Overview
//! The compiler turns a nested state configuration into an immutable machine
//! definition: a depth-first traversal builds the handle-addressed arena,
//! a second pass resolves transition targets with nearest-ancestor scoping,
//! and a validation pass enforces every structural invariant before the
//! definition is handed to callers. Compilation fails closed; a definition
//! that compiles has no unresolved references.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use thiserror::Error;

use crate::core::config::MachineConfig;
use crate::core::config::StateNodeConfig;
use crate::core::config::StateTypeConfig;
use crate::core::config::TransitionBranchConfig;
use crate::core::config::TransitionValueConfig;
use crate::core::config::normalize_specs;
use crate::core::config::DEFAULT_DELIMITER;
use crate::core::config::DEFAULT_MACHINE_ID;
use crate::core::definition::BehaviorSpec;
use crate::core::definition::MachineDefinition;
use crate::core::definition::StateDefinition;
use crate::core::definition::StateHandle;
use crate::core::definition::StateKind;
use crate::core::definition::TransitionBranch;
use crate::core::definition::TransitionDefinition;
use crate::core::event::completion_event;
use crate::core::event::ALWAYS_EVENT;
use crate::core::hashing::hash_machine_config;
use crate::core::hashing::HashError;
use crate::core::identifiers::EventType;
use crate::core::identifiers::MachineId;
use crate::core::identifiers::ScenarioName;
use crate::core::identifiers::StateId;
use crate::core::registry::BehaviorRegistry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Structural configuration problems raised during compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A final state declares children or transitions.
    #[error("final state `{id}` must not declare children or transitions")]
    InvalidFinalState {
        /// Offending state id.
        id: StateId,
    },
    /// An explicitly atomic state declares children.
    #[error("atomic state `{id}` must not declare children")]
    AtomicWithChildren {
        /// Offending state id.
        id: StateId,
    },
    /// A compound state is missing its `initial` pointer.
    #[error("compound state `{id}` is missing an `initial` child")]
    MissingInitial {
        /// Offending state id.
        id: StateId,
    },
    /// An `initial` pointer names an unknown child.
    #[error("state `{id}` declares unknown initial child `{initial}`")]
    UnknownInitial {
        /// Offending state id.
        id: StateId,
        /// Unresolved child name.
        initial: String,
    },
    /// A parallel state declares an `initial` pointer.
    #[error("parallel state `{id}` must not declare `initial`")]
    InitialOnParallel {
        /// Offending state id.
        id: StateId,
    },
    /// A parallel state has no child regions.
    #[error("parallel state `{id}` must declare at least one region")]
    ParallelWithoutRegions {
        /// Offending state id.
        id: StateId,
    },
    /// A parallel region is not a compound state.
    #[error("region `{region}` of parallel state `{id}` must be compound")]
    RegionNotCompound {
        /// Parallel state id.
        id: StateId,
        /// Offending region id.
        region: StateId,
    },
    /// A transition target cannot be resolved.
    #[error("no state definition found for target `{target}` from `{source_id}`")]
    NoStateDefinitionFound {
        /// Source state id of the transition.
        source_id: StateId,
        /// Unresolved target name.
        target: String,
    },
    /// Two states compiled to the same fully-qualified id.
    #[error("duplicate state id `{id}`")]
    DuplicateId {
        /// Duplicated id.
        id: StateId,
    },
    /// The configuration exceeds the arena's addressable state count.
    #[error("configuration exceeds the maximum number of state definitions")]
    TooManyStates,
    /// A behavior referenced by name is not registered.
    #[error("state `{id}` references unregistered {kind} behavior `{name}`")]
    BehaviorNotRegistered {
        /// State referencing the behavior.
        id: StateId,
        /// Behavior table label.
        kind: &'static str,
        /// Unregistered behavior name.
        name: String,
    },
    /// Canonical hashing of the configuration failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

// ============================================================================
// SECTION: Public Entry Point
// ============================================================================

/// Compiles a declarative machine configuration into a machine definition.
///
/// # Errors
///
/// Returns [`CompileError`] when the configuration violates a structural
/// invariant or references an unregistered behavior.
pub fn compile(
    config: MachineConfig,
    registry: BehaviorRegistry,
) -> Result<MachineDefinition, CompileError> {
    let config_hash = hash_machine_config(&config)?;
    let machine_id =
        MachineId::new(config.id.clone().unwrap_or_else(|| DEFAULT_MACHINE_ID.to_string()));
    let delimiter = config.delimiter.clone().unwrap_or_else(|| DEFAULT_DELIMITER.to_string());

    let mut compiler = Compiler {
        machine_id: machine_id.clone(),
        delimiter: delimiter.clone(),
        states: Vec::new(),
        id_map: BTreeMap::new(),
        pending: Vec::new(),
    };

    let root = compiler.build_root(&config)?;

    let mut scenarios = BTreeMap::new();
    for (name, scenario) in &config.scenarios {
        let handle = compiler.build_scenario(root, name, scenario)?;
        scenarios.insert(ScenarioName::new(name.clone()), handle);
    }

    compiler.mark_regions();
    compiler.resolve_initials()?;
    compiler.build_transitions()?;
    compiler.ensure_final_states()?;
    compiler.ensure_parallel_shape()?;
    compiler.ensure_behaviors_registered(&registry)?;

    let events = compiler.collect_event_names();
    let result = config.result.as_deref().map(BehaviorSpec::parse);
    if let Some(spec) = &result {
        if !registry.has_result(&spec.name) {
            return Err(CompileError::BehaviorNotRegistered {
                id: StateId::new(machine_id.as_str()),
                kind: "result",
                name: spec.name.clone(),
            });
        }
    }

    let context_defaults = config
        .context
        .as_ref()
        .map(|defaults| defaults.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
        .unwrap_or_default();

    Ok(MachineDefinition {
        id: machine_id,
        version: config.version,
        delimiter,
        states: compiler.states,
        id_map: compiler.id_map,
        events,
        registry,
        context_defaults,
        result,
        scenarios_enabled: config.scenarios_enabled,
        scenarios,
        config_hash,
        meta: config.meta,
    })
}

// ============================================================================
// SECTION: Compiler Work State
// ============================================================================

/// Transition configuration captured during tree construction for the
/// second-pass target resolution.
struct PendingTransitions {
    /// State the transitions belong to.
    handle: StateHandle,
    /// Event-keyed transition values in declaration order.
    on: IndexMap<String, Option<TransitionValueConfig>>,
    /// Shorthand `@always` transition value.
    always: Option<TransitionValueConfig>,
    /// Shorthand completion transition value.
    on_done: Option<TransitionValueConfig>,
    /// Declared initial child name, resolved after children exist.
    initial: Option<String>,
}

/// Mutable compiler state threaded through the passes.
struct Compiler {
    /// Machine identifier prefixed onto every state id.
    machine_id: MachineId,
    /// Path delimiter joining id segments.
    delimiter: String,
    /// State arena under construction.
    states: Vec<StateDefinition>,
    /// Fully-qualified id to handle map.
    id_map: BTreeMap<String, StateHandle>,
    /// Transition configs awaiting target resolution.
    pending: Vec<PendingTransitions>,
}

impl Compiler {
    /// Builds the machine root node and its subtree.
    fn build_root(&mut self, config: &MachineConfig) -> Result<StateHandle, CompileError> {
        let kind = if config.states.is_empty() {
            StateKind::Atomic
        } else {
            StateKind::Compound
        };
        let root = self.push_node(
            self.machine_id.as_str().to_string(),
            StateId::new(self.machine_id.as_str()),
            String::new(),
            None,
            kind,
            Vec::new(),
            Vec::new(),
            None,
        )?;
        self.pending.push(PendingTransitions {
            handle: root,
            on: IndexMap::new(),
            always: None,
            on_done: None,
            initial: config.initial.clone(),
        });

        let mut children = Vec::new();
        for (key, child) in &config.states {
            children.push(self.build_node(key, child, root, &[])?);
        }
        self.states[root.index()].children = children;
        Ok(root)
    }

    /// Builds a scenario overlay subtree rooted under the machine root.
    ///
    /// Overlay roots keep a parent link for event bubbling but are not listed
    /// among the root's children, so normal traversal never enters them.
    fn build_scenario(
        &mut self,
        root: StateHandle,
        name: &str,
        scenario: &crate::core::config::ScenarioConfig,
    ) -> Result<StateHandle, CompileError> {
        let route = name.to_string();
        let id = self.qualified_id(&route);
        let handle = self.push_node(
            name.to_string(),
            id,
            route,
            Some(root),
            StateKind::Compound,
            Vec::new(),
            Vec::new(),
            None,
        )?;
        let initial = scenario
            .initial
            .clone()
            .or_else(|| scenario.states.keys().next().cloned());
        self.pending.push(PendingTransitions {
            handle,
            on: IndexMap::new(),
            always: None,
            on_done: None,
            initial,
        });

        let path = vec![name.to_string()];
        let mut children = Vec::new();
        for (key, child) in &scenario.states {
            children.push(self.build_node(key, child, handle, &path)?);
        }
        self.states[handle.index()].children = children;
        Ok(handle)
    }

    /// Builds one state node and its subtree depth-first.
    fn build_node(
        &mut self,
        key: &str,
        config: &StateNodeConfig,
        parent: StateHandle,
        parent_path: &[String],
    ) -> Result<StateHandle, CompileError> {
        let mut path = parent_path.to_vec();
        path.push(key.to_string());
        let route = path.join(&self.delimiter);
        let id = match &config.id {
            Some(explicit) => StateId::new(explicit.clone()),
            None => self.qualified_id(&route),
        };

        let kind = infer_kind(config);
        if matches!(kind, StateKind::Atomic) && !config.states.is_empty() {
            return Err(CompileError::AtomicWithChildren {
                id,
            });
        }
        if matches!(kind, StateKind::Final)
            && (!config.states.is_empty()
                || !config.on.is_empty()
                || config.always.is_some()
                || config.on_done.is_some())
        {
            return Err(CompileError::InvalidFinalState {
                id,
            });
        }

        let entry = normalize_specs(config.entry.as_ref())
            .iter()
            .map(|spec| BehaviorSpec::parse(spec))
            .collect();
        let exit = normalize_specs(config.exit.as_ref())
            .iter()
            .map(|spec| BehaviorSpec::parse(spec))
            .collect();

        let handle = self.push_node(
            key.to_string(),
            id,
            route,
            Some(parent),
            kind,
            entry,
            exit,
            config.meta.clone(),
        )?;
        self.pending.push(PendingTransitions {
            handle,
            on: config.on.clone(),
            always: config.always.clone(),
            on_done: config.on_done.clone(),
            initial: config.initial.clone(),
        });

        let mut children = Vec::new();
        for (child_key, child) in &config.states {
            children.push(self.build_node(child_key, child, handle, &path)?);
        }
        self.states[handle.index()].children = children;
        Ok(handle)
    }

    /// Pushes a node into the arena and installs it into the id map.
    #[allow(
        clippy::too_many_arguments,
        reason = "Node construction mirrors the definition fields one-to-one."
    )]
    fn push_node(
        &mut self,
        key: String,
        id: StateId,
        route: String,
        parent: Option<StateHandle>,
        kind: StateKind,
        entry: Vec<BehaviorSpec>,
        exit: Vec<BehaviorSpec>,
        meta: Option<serde_json::Value>,
    ) -> Result<StateHandle, CompileError> {
        let index = u32::try_from(self.states.len()).map_err(|_| CompileError::TooManyStates)?;
        let handle = StateHandle::new(index);
        if self.id_map.insert(id.as_str().to_string(), handle).is_some() {
            return Err(CompileError::DuplicateId {
                id,
            });
        }
        self.states.push(StateDefinition {
            key,
            id,
            route,
            parent,
            children: Vec::new(),
            kind,
            initial: None,
            entry,
            exit,
            transitions: BTreeMap::new(),
            is_region: false,
            meta,
        });
        Ok(handle)
    }

    /// Joins the machine id with a route into a fully-qualified id.
    fn qualified_id(&self, route: &str) -> StateId {
        StateId::new(format!("{}{}{route}", self.machine_id, self.delimiter))
    }

    /// Marks direct children of parallel states as regions.
    fn mark_regions(&mut self) {
        let mut regions = Vec::new();
        for state in &self.states {
            if matches!(state.kind, StateKind::Parallel) {
                regions.extend(state.children.iter().copied());
            }
        }
        for handle in regions {
            self.states[handle.index()].is_region = true;
        }
    }

    /// Resolves declared `initial` names to child handles.
    fn resolve_initials(&mut self) -> Result<(), CompileError> {
        for pending in &self.pending {
            let handle = pending.handle;
            let state = &self.states[handle.index()];
            match &pending.initial {
                Some(name) => {
                    if matches!(state.kind, StateKind::Parallel) {
                        return Err(CompileError::InitialOnParallel {
                            id: state.id.clone(),
                        });
                    }
                    let child = state
                        .children
                        .iter()
                        .copied()
                        .find(|child| self.states[child.index()].key == *name)
                        .ok_or_else(|| CompileError::UnknownInitial {
                            id: state.id.clone(),
                            initial: name.clone(),
                        })?;
                    self.states[handle.index()].initial = Some(child);
                }
                None => {
                    if matches!(state.kind, StateKind::Compound) {
                        return Err(CompileError::MissingInitial {
                            id: state.id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds transition definitions from the pending configs.
    fn build_transitions(&mut self) -> Result<(), CompileError> {
        let pending = std::mem::take(&mut self.pending);
        for entry in &pending {
            let handle = entry.handle;
            let mut transitions = BTreeMap::new();

            for (event_key, value) in &entry.on {
                let event_type = EventType::new(event_key.clone());
                let definition = self.build_transition(handle, &event_type, value.as_ref())?;
                transitions.insert(event_type, definition);
            }

            if let Some(value) = &entry.always {
                let event_type = EventType::new(ALWAYS_EVENT);
                let definition = self.build_transition(handle, &event_type, Some(value))?;
                transitions.insert(event_type, definition);
            }

            if let Some(value) = &entry.on_done {
                let event_type = completion_event(&self.states[handle.index()].id);
                let definition = self.build_transition(handle, &event_type, Some(value))?;
                transitions.insert(event_type, definition);
            }

            self.states[handle.index()].transitions = transitions;
        }
        Ok(())
    }

    /// Builds one transition definition, resolving branch targets.
    fn build_transition(
        &self,
        source: StateHandle,
        event_type: &EventType,
        value: Option<&TransitionValueConfig>,
    ) -> Result<TransitionDefinition, CompileError> {
        let configs = normalize_branches(value);
        let mut branches = Vec::with_capacity(configs.len());
        for config in &configs {
            let target = match &config.target {
                Some(name) => Some(self.resolve_target(source, name)?),
                None => None,
            };
            branches.push(TransitionBranch {
                target,
                guards: parse_specs(config.guards.as_ref()),
                calculators: parse_specs(config.calculators.as_ref()),
                actions: parse_specs(config.actions.as_ref()),
                description: config.description.clone(),
            });
        }
        let is_guarded = branches.iter().any(|branch| !branch.guards.is_empty());
        Ok(TransitionDefinition {
            source,
            event_type: event_type.clone(),
            branches,
            is_always: event_type.as_str() == ALWAYS_EVENT,
            is_guarded,
        })
    }

    /// Resolves a target name using nearest-ancestor scoping.
    ///
    /// Absolute ids (full entries of the id map, including explicit id
    /// overrides) bypass the relative search. Otherwise the delimiter-split
    /// segments are resolved as a descendant chain, first against the source
    /// itself, then against each ancestor in turn.
    fn resolve_target(
        &self,
        source: StateHandle,
        target: &str,
    ) -> Result<StateHandle, CompileError> {
        if let Some(handle) = self.id_map.get(target) {
            return Ok(*handle);
        }

        let segments: Vec<&str> = target.split(&self.delimiter).collect();
        let mut scope = Some(source);
        while let Some(current) = scope {
            if let Some(handle) = self.resolve_descendant(current, &segments) {
                return Ok(handle);
            }
            scope = self.states[current.index()].parent;
        }

        Err(CompileError::NoStateDefinitionFound {
            source_id: self.states[source.index()].id.clone(),
            target: target.to_string(),
        })
    }

    /// Resolves a segment chain as descendants of a scope node.
    fn resolve_descendant(&self, scope: StateHandle, segments: &[&str]) -> Option<StateHandle> {
        let mut cursor = scope;
        for segment in segments {
            cursor = self.states[cursor.index()]
                .children
                .iter()
                .copied()
                .find(|child| self.states[child.index()].key == *segment)?;
        }
        Some(cursor)
    }

    /// Ensures final states carry no children and no transitions.
    fn ensure_final_states(&self) -> Result<(), CompileError> {
        for state in &self.states {
            if state.is_final() && (!state.children.is_empty() || !state.transitions.is_empty()) {
                return Err(CompileError::InvalidFinalState {
                    id: state.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Ensures parallel states have compound regions and no initial pointer.
    fn ensure_parallel_shape(&self) -> Result<(), CompileError> {
        for state in &self.states {
            if !matches!(state.kind, StateKind::Parallel) {
                continue;
            }
            if state.children.is_empty() {
                return Err(CompileError::ParallelWithoutRegions {
                    id: state.id.clone(),
                });
            }
            for child in &state.children {
                let region = &self.states[child.index()];
                if !matches!(region.kind, StateKind::Compound) {
                    return Err(CompileError::RegionNotCompound {
                        id: state.id.clone(),
                        region: region.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ensures every referenced behavior name is registered.
    fn ensure_behaviors_registered(&self, registry: &BehaviorRegistry) -> Result<(), CompileError> {
        for state in &self.states {
            for spec in state.entry.iter().chain(state.exit.iter()) {
                if !registry.has_action(&spec.name) {
                    return Err(CompileError::BehaviorNotRegistered {
                        id: state.id.clone(),
                        kind: "action",
                        name: spec.name.clone(),
                    });
                }
            }
            for transition in state.transitions.values() {
                for branch in &transition.branches {
                    for spec in &branch.actions {
                        if !registry.has_action(&spec.name) {
                            return Err(CompileError::BehaviorNotRegistered {
                                id: state.id.clone(),
                                kind: "action",
                                name: spec.name.clone(),
                            });
                        }
                    }
                    for spec in &branch.guards {
                        if !registry.has_guard(&spec.name) {
                            return Err(CompileError::BehaviorNotRegistered {
                                id: state.id.clone(),
                                kind: "guard",
                                name: spec.name.clone(),
                            });
                        }
                    }
                    for spec in &branch.calculators {
                        if !registry.has_calculator(&spec.name) {
                            return Err(CompileError::BehaviorNotRegistered {
                                id: state.id.clone(),
                                kind: "calculator",
                                name: spec.name.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects the flat set of user-visible event names.
    fn collect_event_names(&self) -> BTreeSet<EventType> {
        let mut events = BTreeSet::new();
        for state in &self.states {
            for event_type in state.transitions.keys() {
                if !event_type.is_internal() {
                    events.insert(event_type.clone());
                }
            }
        }
        events
    }
}

// ============================================================================
// SECTION: Shape Helpers
// ============================================================================

/// Infers the structural kind of a state config.
fn infer_kind(config: &StateNodeConfig) -> StateKind {
    match config.state_type {
        Some(StateTypeConfig::Final) => StateKind::Final,
        Some(StateTypeConfig::Parallel) => StateKind::Parallel,
        Some(StateTypeConfig::Compound) => StateKind::Compound,
        Some(StateTypeConfig::Atomic) => StateKind::Atomic,
        None => {
            if config.states.is_empty() {
                StateKind::Atomic
            } else {
                StateKind::Compound
            }
        }
    }
}

/// Normalizes a transition value into an ordered branch config list.
fn normalize_branches(value: Option<&TransitionValueConfig>) -> Vec<TransitionBranchConfig> {
    match value {
        None => vec![TransitionBranchConfig::default()],
        Some(TransitionValueConfig::Target(target)) => vec![TransitionBranchConfig {
            target: Some(target.clone()),
            ..TransitionBranchConfig::default()
        }],
        Some(TransitionValueConfig::Branch(branch)) => vec![branch.clone()],
        Some(TransitionValueConfig::Branches(branches)) => branches.clone(),
    }
}

/// Parses an optional scalar-or-list of behavior specs.
fn parse_specs(list: Option<&crate::core::config::BehaviorSpecList>) -> Vec<BehaviorSpec> {
    normalize_specs(list).iter().map(|spec| BehaviorSpec::parse(spec)).collect()
}
