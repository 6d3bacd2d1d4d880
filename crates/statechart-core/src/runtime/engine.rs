// crates/statechart-core/src/runtime/engine.rs
// ============================================================================
// Module: Statechart Step Engine
// Description: Run-to-completion step orchestration and record emission.
// Purpose: Execute one RTC step with strict ordering and a durable trace.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The step engine is the single canonical execution path of the interpreter.
//! One step is atomic from the caller's viewpoint: transition selection,
//! calculators, guards, transition actions, exit actions, state update, entry
//! actions, always-transitions, raised events, and completion detection all
//! run inside the same synchronous invocation, appending internal event
//! records in execution order.
//!
//! Errors wrap the partial record log so callers can persist what happened up
//! to the failure; successful steps append their records to the history store
//! before returning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::context::context_delta;
use crate::core::context::Context;
use crate::core::context::ContextError;
use crate::core::definition::BehaviorSpec;
use crate::core::definition::MachineDefinition;
use crate::core::definition::StateHandle;
use crate::core::definition::StateKind;
use crate::core::event::completion_event;
use crate::core::event::Event;
use crate::core::event::EventInput;
use crate::core::event::ValidationError;
use crate::core::event::ALWAYS_EVENT;
use crate::core::event::INIT_EVENT;
use crate::core::identifiers::EventType;
use crate::core::identifiers::RootEventId;
use crate::core::identifiers::StateId;
use crate::core::record::InternalEventRecord;
use crate::core::record::RecordTag;
use crate::core::registry::ActionScope;
use crate::core::registry::BehaviorError;
use crate::core::registry::CalculatorScope;
use crate::core::registry::GuardScope;
use crate::core::registry::ResultScope;
use crate::core::state::RunStatus;
use crate::core::state::State;
use crate::core::record::StepTime;
use crate::interfaces::HistoryStore;
use crate::interfaces::StoreError;
use crate::runtime::queue::EventQueue;
use crate::runtime::selector;

// ============================================================================
// SECTION: Interpreter Configuration
// ============================================================================

/// Configuration for the step engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Upper bound on micro-steps (always-transitions, raised events,
    /// completion events) within one RTC step.
    pub max_microsteps: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_microsteps: 256,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Step execution errors by kind.
#[derive(Debug, Error)]
pub enum StepError {
    /// Event payload, context, or validation-guard failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Context schema violation or missing behavior key.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Behavior resolution or invocation failure.
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
    /// No transition handles the event after bubbling to the root.
    #[error("no transition defined for event `{event_type}` in state `{value}`")]
    NoTransitionForEvent {
        /// Unhandled event type.
        event_type: EventType,
        /// Active routes at dispatch time, comma-joined.
        value: String,
    },
    /// Unreachable cases indicating compiler or caller corruption.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// History store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Persisted run was produced by a different machine definition.
    #[error("definition hash mismatch for root event id `{0}`")]
    DefinitionMismatch(String),
}

/// Step failure wrapping the partial record log.
///
/// The records cover everything the step did before failing, so callers can
/// persist the trace even when the step aborts.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StepFailure {
    /// Failure kind.
    pub error: StepError,
    /// Records emitted before the failure.
    pub records: Vec<InternalEventRecord>,
}

impl StepFailure {
    /// Creates a failure with no partial records.
    #[must_use]
    pub fn bare(error: StepError) -> Self {
        Self {
            error,
            records: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Step Requests
// ============================================================================

/// Request to materialize the initial state of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInit {
    /// Root event identifier anchoring the new run.
    pub root_event_id: RootEventId,
    /// Time stamp applied to the step's records.
    pub time: StepTime,
    /// Optional initial event; `@init` is synthesized when absent.
    pub event: Option<EventInput>,
}

// ============================================================================
// SECTION: Interpreter
// ============================================================================

/// Step engine executing RTC steps against a shared machine definition.
pub struct Interpreter<S> {
    /// Shared, immutable machine definition.
    machine: Arc<MachineDefinition>,
    /// History store receiving each step's records.
    store: S,
    /// Engine configuration.
    config: InterpreterConfig,
}

impl<S> Interpreter<S>
where
    S: HistoryStore,
{
    /// Creates an interpreter with the default configuration.
    #[must_use]
    pub fn new(machine: Arc<MachineDefinition>, store: S) -> Self {
        Self {
            machine,
            store,
            config: InterpreterConfig::default(),
        }
    }

    /// Creates an interpreter with an explicit configuration.
    #[must_use]
    pub fn with_config(machine: Arc<MachineDefinition>, store: S, config: InterpreterConfig) -> Self {
        Self {
            machine,
            store,
            config,
        }
    }

    /// Returns the shared machine definition.
    #[must_use]
    pub const fn machine(&self) -> &Arc<MachineDefinition> {
        &self.machine
    }

    /// Materializes the initial state of a new run.
    ///
    /// Builds the context from schema and config defaults, emits
    /// MACHINE_START, runs the initial entry chain outermost to innermost,
    /// and drives always-transitions and raised events to quiescence.
    ///
    /// # Errors
    ///
    /// Returns [`StepFailure`] wrapping the partial record log when context
    /// construction, validation, or any behavior fails.
    pub fn initial_state(&self, init: StepInit) -> Result<State, StepFailure> {
        let context = self.build_context().map_err(StepFailure::bare)?;
        let state = State {
            root_event_id: init.root_event_id,
            machine_id: self.machine.id.clone(),
            delimiter: self.machine.delimiter.clone(),
            value: Vec::new(),
            context,
            current_event: None,
            records: Vec::new(),
            seq: 0,
            status: RunStatus::Running,
        };

        let mut run = StepRun::new(&self.machine, state, init.time, self.config);
        let event = match run.validate_input(init.event.unwrap_or_else(|| EventInput::from(INIT_EVENT))) {
            Ok(event) => event,
            Err(error) => return Err(run.fail(error, 0)),
        };
        run.state.current_event = Some(event);

        let outcome = match run.start_run() {
            Ok(()) => run.run_to_completion(),
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            return Err(run.fail(error, 0));
        }

        let state = run.into_state();
        self.store
            .append(&state.root_event_id, &state.records)
            .map_err(|err| StepFailure {
                error: StepError::Store(err),
                records: state.records.clone(),
            })?;
        Ok(state)
    }

    /// Executes one RTC step for an event against an existing state.
    ///
    /// # Errors
    ///
    /// Returns [`StepFailure`] wrapping the partial record log when the event
    /// fails validation, no transition handles it, or a behavior fails.
    pub fn transition(
        &self,
        state: &State,
        event: impl Into<EventInput>,
        time: StepTime,
    ) -> Result<State, StepFailure> {
        if state.machine_id != self.machine.id {
            return Err(StepFailure::bare(StepError::InvariantViolation(format!(
                "state belongs to machine `{}`, not `{}`",
                state.machine_id, self.machine.id
            ))));
        }

        let step_start = state.records.len();
        let mut run = StepRun::new(&self.machine, state.clone(), time, self.config);
        let event = match run.validate_input(event.into()) {
            Ok(event) => event,
            Err(error) => return Err(run.fail(error, step_start)),
        };

        let outcome = match run.dispatch(event, true) {
            Ok(()) => run.run_to_completion(),
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            return Err(run.fail(error, step_start));
        }

        let state = run.into_state();
        self.store
            .append(&state.root_event_id, &state.records[step_start..])
            .map_err(|err| StepFailure {
                error: StepError::Store(err),
                records: state.records[step_start..].to_vec(),
            })?;
        Ok(state)
    }

    /// Restores a state from the persisted records of a run.
    ///
    /// The active leaf set comes from the last record carrying a state value;
    /// the context is rebuilt by folding context deltas in sequence order.
    /// The definition hash recorded at MACHINE_START must match this
    /// interpreter's definition.
    ///
    /// # Errors
    ///
    /// Returns [`StepFailure`] when the run is unknown, the record log is
    /// malformed, or the definition hash does not match.
    pub fn restore(&self, root_event_id: &RootEventId) -> Result<State, StepFailure> {
        let records = self
            .store
            .load(root_event_id)
            .map_err(|err| StepFailure::bare(StepError::Store(err)))?;
        let first = records.first().ok_or_else(|| {
            StepFailure::bare(StepError::Store(StoreError::RunNotFound(
                root_event_id.as_str().to_string(),
            )))
        })?;
        if first.tag != RecordTag::MachineStart {
            return Err(StepFailure::bare(StepError::InvariantViolation(
                "first record of a run must be MACHINE_START".to_string(),
            )));
        }
        let recorded_digest = first
            .payload
            .as_ref()
            .and_then(|payload| payload.get("config_hash"))
            .and_then(Value::as_str);
        if recorded_digest != Some(self.machine.config_hash.as_str()) {
            return Err(StepFailure::bare(StepError::DefinitionMismatch(
                root_event_id.as_str().to_string(),
            )));
        }

        let mut context = self.build_context().map_err(StepFailure::bare)?;
        let mut value: Option<Vec<StateId>> = None;
        let mut status = RunStatus::Running;
        let mut seq = 0;
        let mut folded = std::collections::BTreeMap::new();
        for record in &records {
            if let Some(delta) = &record.context_delta {
                for (key, entry) in delta {
                    folded.insert(key.clone(), entry.clone());
                }
            }
            if let Some(state_value) = &record.state_value {
                value = Some(state_value.clone());
            }
            if record.tag == RecordTag::MachineFinish {
                status = RunStatus::Done;
            }
            seq = record.seq;
        }
        context.apply_delta(&folded);

        let value = value.ok_or_else(|| {
            StepFailure::bare(StepError::InvariantViolation(
                "run records carry no state value".to_string(),
            ))
        })?;

        Ok(State {
            root_event_id: root_event_id.clone(),
            machine_id: self.machine.id.clone(),
            delimiter: self.machine.delimiter.clone(),
            value,
            context,
            current_event: None,
            records: Vec::new(),
            seq,
            status,
        })
    }

    /// Extracts the machine result from a state via the configured extractor.
    ///
    /// Returns `None` when the machine declares no result behavior.
    ///
    /// # Errors
    ///
    /// Returns [`StepFailure`] when the extractor is unregistered or fails.
    pub fn result(&self, state: &State) -> Result<Option<Value>, StepFailure> {
        let Some(spec) = &self.machine.result else {
            return Ok(None);
        };
        let behavior = self
            .machine
            .registry
            .resolve_result(&spec.name)
            .map_err(|err| StepFailure::bare(StepError::Behavior(err)))?;
        let scope = ResultScope {
            context: &state.context,
            active: &state.value,
            args: &spec.args,
        };
        behavior
            .extract(&scope)
            .map(Some)
            .map_err(|err| StepFailure::bare(StepError::Behavior(err)))
    }

    /// Builds a fresh context from schema and config defaults.
    fn build_context(&self) -> Result<Context, StepError> {
        let mut context = match self.machine.registry.schema() {
            Some(schema) => Context::from_schema(Arc::clone(schema)),
            None => Context::new(std::collections::BTreeMap::new()),
        };
        for (key, default) in &self.machine.context_defaults {
            context.set(key.clone(), default.clone());
        }
        context.validate()?;
        Ok(context)
    }
}

// ============================================================================
// SECTION: Record Drafts
// ============================================================================

/// Draft of an internal event record, filled by the step run on emission.
struct RecordDraft {
    /// Record tag.
    tag: RecordTag,
    /// User event type being processed.
    event_type: Option<EventType>,
    /// Subject string (state route, behavior name, or event type).
    subject: Option<String>,
    /// Structured payload.
    payload: Option<Value>,
    /// Active leaf set snapshot.
    state_value: Option<Vec<StateId>>,
    /// Context delta attached to behavior records.
    context_delta: Option<std::collections::BTreeMap<String, Value>>,
    /// Opaque metadata from the definition.
    meta: Option<Value>,
    /// Persistence flag honored by external storage.
    should_log: bool,
}

impl RecordDraft {
    /// Creates a draft with defaults.
    fn new(tag: RecordTag) -> Self {
        Self {
            tag,
            event_type: None,
            subject: None,
            payload: None,
            state_value: None,
            context_delta: None,
            meta: None,
            should_log: true,
        }
    }

    /// Sets the subject string.
    fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the user event type.
    fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets the structured payload.
    fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the state value snapshot.
    fn state_value(mut self, value: Vec<StateId>) -> Self {
        self.state_value = Some(value);
        self
    }

    /// Sets the context delta.
    fn context_delta(
        mut self,
        delta: Option<std::collections::BTreeMap<String, Value>>,
    ) -> Self {
        self.context_delta = delta;
        self
    }

    /// Sets the opaque metadata.
    fn meta(mut self, meta: Option<Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the persistence flag.
    fn should_log(mut self, should_log: bool) -> Self {
        self.should_log = should_log;
        self
    }
}

// ============================================================================
// SECTION: Step Run
// ============================================================================

/// Working state of one RTC step.
struct StepRun<'m> {
    /// Shared machine definition.
    machine: &'m MachineDefinition,
    /// State being evolved by the step.
    state: State,
    /// Step-scoped queue of raised events.
    queue: EventQueue,
    /// Time stamp applied to records.
    time: StepTime,
    /// Engine configuration.
    config: InterpreterConfig,
    /// Micro-steps consumed so far.
    microsteps: usize,
    /// Always-transition sources exhausted until the next branch executes.
    always_blocked: BTreeSet<StateHandle>,
    /// Done states already fired during this step.
    done_fired: BTreeSet<StateHandle>,
    /// Completed ancestors awaiting their completion event.
    pending_done: VecDeque<StateHandle>,
    /// Leaves entered by the current micro-step.
    changed_leaves: Vec<StateHandle>,
}

impl<'m> StepRun<'m> {
    /// Creates a step run over an owned state.
    fn new(
        machine: &'m MachineDefinition,
        state: State,
        time: StepTime,
        config: InterpreterConfig,
    ) -> Self {
        Self {
            machine,
            state,
            queue: EventQueue::new(),
            time,
            config,
            microsteps: 0,
            always_blocked: BTreeSet::new(),
            done_fired: BTreeSet::new(),
            pending_done: VecDeque::new(),
            changed_leaves: Vec::new(),
        }
    }

    /// Consumes the run, returning the evolved state.
    fn into_state(self) -> State {
        self.state
    }

    /// Wraps a step error with the records emitted since `step_start`.
    fn fail(self, error: StepError, step_start: usize) -> StepFailure {
        StepFailure {
            error,
            records: self.state.records[step_start..].to_vec(),
        }
    }

    // ------------------------------------------------------------------
    // Record emission
    // ------------------------------------------------------------------

    /// Emits a record from a draft, assigning the next sequence number.
    fn emit(&mut self, draft: RecordDraft) {
        self.state.seq += 1;
        self.state.records.push(InternalEventRecord {
            root_event_id: self.state.root_event_id.clone(),
            seq: self.state.seq,
            machine_id: self.machine.id.clone(),
            tag: draft.tag,
            event_type: draft.event_type,
            subject: draft.subject,
            payload: draft.payload,
            state_value: draft.state_value,
            context_delta: draft.context_delta,
            meta: draft.meta,
            should_log: draft.should_log,
            created_at: self.time,
        });
    }

    /// Returns the current event, synthesizing `@init` when absent.
    fn current_event(&self) -> Event {
        self.state
            .current_event
            .clone()
            .unwrap_or_else(|| Event::new(INIT_EVENT))
    }

    /// Returns the route of a state (machine id excluded).
    fn route(&self, handle: StateHandle) -> String {
        self.machine.state(handle).route.clone()
    }

    /// Returns the comma-joined active routes for error messages.
    fn joined_routes(&self) -> String {
        self.state.routes().join(",")
    }

    // ------------------------------------------------------------------
    // Event validation and scenario resolution
    // ------------------------------------------------------------------

    /// Validates an event input against registered payload rules.
    fn validate_input(&self, input: EventInput) -> Result<Event, StepError> {
        match input {
            EventInput::Validated(event) => Ok(event),
            EventInput::Raw {
                event_type,
                payload,
            } => {
                if let Some(definition) = self.machine.registry.event_definition(&event_type) {
                    definition.validate(payload.as_ref())?;
                }
                Ok(Event {
                    event_type,
                    payload,
                })
            }
        }
    }

    /// Returns the active scenario name from the context, when enabled.
    fn scenario_name(&self) -> Option<String> {
        if !self.machine.scenarios_enabled {
            return None;
        }
        let name = self.state.context.get("scenarioType")?.as_str()?;
        let key = crate::core::identifiers::ScenarioName::new(name);
        self.machine.scenarios.contains_key(&key).then(|| name.to_string())
    }

    /// Rewrites a handle to its scenario overlay counterpart, when present.
    fn overlay(&self, handle: StateHandle) -> StateHandle {
        let Some(scenario) = self.scenario_name() else {
            return handle;
        };
        let route = &self.machine.state(handle).route;
        let delimiter = &self.machine.delimiter;
        let candidate = if route.is_empty() {
            format!("{}{delimiter}{scenario}", self.machine.id)
        } else {
            format!("{}{delimiter}{scenario}{delimiter}{route}", self.machine.id)
        };
        self.machine.resolve_id(&candidate).unwrap_or(handle)
    }

    /// Resolves the active leaf ids to handles, applying overlay precedence.
    ///
    /// Overlay rewrites are persisted back into the state value so the active
    /// set and the resolved handles agree for the remainder of the step.
    fn active_handles(&mut self) -> Result<Vec<StateHandle>, StepError> {
        let mut handles = Vec::with_capacity(self.state.value.len());
        let mut rewrites = Vec::new();
        for (index, id) in self.state.value.iter().enumerate() {
            let handle = self.machine.resolve_id(id.as_str()).ok_or_else(|| {
                StepError::InvariantViolation(format!("active leaf `{id}` is not a known state"))
            })?;
            let resolved = self.overlay(handle);
            if resolved != handle {
                rewrites.push((index, self.machine.state(resolved).id.clone()));
            }
            handles.push(resolved);
        }
        for (index, id) in rewrites {
            self.state.value[index] = id;
        }
        Ok(handles)
    }

    /// Returns true when a handle is currently an active leaf.
    fn is_active(&self, handle: StateHandle) -> bool {
        let id = &self.machine.state(handle).id;
        self.state.value.iter().any(|active| active == id)
    }

    /// Returns true when any active leaf lies in the subtree of a node.
    fn active_under(&self, node: StateHandle) -> bool {
        self.state.value.iter().any(|id| {
            self.machine
                .resolve_id(id.as_str())
                .is_some_and(|leaf| leaf == node || self.machine.is_ancestor(node, leaf))
        })
    }

    // ------------------------------------------------------------------
    // Run start and initial entry
    // ------------------------------------------------------------------

    /// Emits MACHINE_START and performs the initial entry chain.
    fn start_run(&mut self) -> Result<(), StepError> {
        let machine = self.machine;
        let root = machine.root();
        let initial_value = self.initial_leaves(root)?;
        let delta = context_delta(&std::collections::BTreeMap::new(), &self.state.context.snapshot());
        let mut payload = Map::new();
        payload.insert(
            "config_hash".to_string(),
            Value::String(machine.config_hash.as_str().to_string()),
        );
        self.emit(
            RecordDraft::new(RecordTag::MachineStart)
                .subject(machine.id.as_str())
                .payload(Value::Object(payload))
                .state_value(initial_value)
                .context_delta(delta)
                .meta(machine.meta.clone()),
        );

        let root_def = machine.state(root);
        match root_def.kind {
            StateKind::Atomic | StateKind::Final => {
                self.state.value.push(root_def.id.clone());
            }
            StateKind::Compound => {
                let first = root_def.initial.ok_or_else(|| {
                    StepError::InvariantViolation("compound root without initial".to_string())
                })?;
                let target = self.overlay(first);
                let mut insert_at = 0;
                self.enter_node(target, &[], &mut insert_at)?;
            }
            StateKind::Parallel => {
                let mut insert_at = 0;
                self.enter_node(root, &[], &mut insert_at)?;
            }
        }
        Ok(())
    }

    /// Computes the initial leaf configuration without side effects.
    fn initial_leaves(&self, node: StateHandle) -> Result<Vec<StateId>, StepError> {
        let mut leaves = Vec::new();
        self.collect_initial_leaves(node, true, &mut leaves)?;
        Ok(leaves)
    }

    /// Recursive helper for [`Self::initial_leaves`].
    fn collect_initial_leaves(
        &self,
        node: StateHandle,
        apply_overlay: bool,
        leaves: &mut Vec<StateId>,
    ) -> Result<(), StepError> {
        let machine = self.machine;
        let def = machine.state(node);
        match def.kind {
            StateKind::Atomic | StateKind::Final => {
                leaves.push(def.id.clone());
                Ok(())
            }
            StateKind::Compound => {
                let initial = def.initial.ok_or_else(|| {
                    StepError::InvariantViolation(format!(
                        "compound state `{}` without initial",
                        def.id
                    ))
                })?;
                let next = if apply_overlay {
                    self.overlay(initial)
                } else {
                    initial
                };
                self.collect_initial_leaves(next, false, leaves)
            }
            StateKind::Parallel => {
                for region in &def.children {
                    self.collect_initial_leaves(*region, false, leaves)?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch and micro-transitions
    // ------------------------------------------------------------------

    /// Dispatches an event through broadcast selection.
    ///
    /// External events with no match abort the step; raised and synthesized
    /// events with no match are dropped after their records.
    fn dispatch(&mut self, event: Event, external: bool) -> Result<(), StepError> {
        let event_type = event.event_type.clone();
        self.state.current_event = Some(event);
        let leaves = self.active_handles()?;
        let matches = selector::broadcast(self.machine, &leaves, &event_type);
        if matches.is_empty() {
            if external {
                return Err(StepError::NoTransitionForEvent {
                    event_type,
                    value: self.joined_routes(),
                });
            }
            return Ok(());
        }
        for selected in matches {
            if !self.is_active(selected.leaf) {
                continue;
            }
            self.micro_transition(selected.leaf, selected.source)?;
        }
        Ok(())
    }

    /// Executes one micro-transition: arbitration, actions, exit, entry.
    fn micro_transition(&mut self, leaf: StateHandle, source: StateHandle) -> Result<(), StepError> {
        let machine = self.machine;
        let event = self.current_event();
        let event_type = event.event_type.clone();
        let subject = transition_subject(&self.route(source), &event_type);

        self.emit(
            RecordDraft::new(RecordTag::TransitionStart)
                .subject(subject.clone())
                .event_type(event_type.clone()),
        );

        let selected = self.arbitrate(source, &event_type)?;
        let Some(branch_index) = selected else {
            self.emit(
                RecordDraft::new(RecordTag::TransitionFail)
                    .subject(subject)
                    .event_type(event_type.clone()),
            );
            if event_type.as_str() == ALWAYS_EVENT {
                self.always_blocked.insert(source);
            }
            return Ok(());
        };

        let transition = machine
            .state(source)
            .transition_for(&event_type)
            .ok_or_else(|| {
                StepError::InvariantViolation("selected transition disappeared".to_string())
            })?;
        let branch = &transition.branches[branch_index];
        let actions = branch.actions.clone();
        let description = branch.description.clone();
        let target = branch.target;

        for spec in &actions {
            self.run_action(spec)?;
        }

        let mut finish = RecordDraft::new(RecordTag::TransitionFinish)
            .subject(subject)
            .event_type(event_type);
        if let Some(description) = description {
            let mut payload = Map::new();
            payload.insert("description".to_string(), Value::String(description));
            finish = finish.payload(Value::Object(payload));
        }
        self.emit(finish);

        self.always_blocked.clear();
        self.changed_leaves.clear();
        if let Some(target) = target {
            self.take_transition(leaf, source, target)?;
        }
        self.collect_done_ancestors();
        Ok(())
    }

    /// Arbitrates the branches of a transition, returning the selected index.
    ///
    /// Calculators of a branch run before its guards; the first branch whose
    /// guards all pass wins. Validation-flavored guard failures abort the
    /// step with the guard's message.
    fn arbitrate(
        &mut self,
        source: StateHandle,
        event_type: &EventType,
    ) -> Result<Option<usize>, StepError> {
        let machine = self.machine;
        let transition = machine.state(source).transition_for(event_type).ok_or_else(|| {
            StepError::InvariantViolation("arbitrating an undefined transition".to_string())
        })?;

        for (index, branch) in transition.branches.iter().enumerate() {
            for spec in branch.calculators.clone() {
                self.run_calculator(&spec)?;
            }

            let mut all_passed = true;
            for spec in branch.guards.clone() {
                if !self.run_guard(&spec)? {
                    all_passed = false;
                    break;
                }
            }
            if all_passed {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Behavior invocation
    // ------------------------------------------------------------------

    /// Runs one action behavior with bracketing records.
    fn run_action(&mut self, spec: &BehaviorSpec) -> Result<(), StepError> {
        let machine = self.machine;
        let behavior = machine.registry.resolve_action(&spec.name)?;
        let should_log = behavior.should_log();
        self.state.context.ensure_keys(&spec.name, behavior.required_context())?;
        self.emit(
            RecordDraft::new(RecordTag::ActionStart)
                .subject(spec.to_string())
                .should_log(should_log),
        );

        let event = self.current_event();
        let before = self.state.context.snapshot();
        {
            let mut scope = ActionScope {
                context: &mut self.state.context,
                event: &event,
                active: &self.state.value,
                args: &spec.args,
                raise: &mut self.queue,
            };
            behavior.invoke(&mut scope)?;
        }
        self.state.context.validate()?;
        let delta = context_delta(&before, &self.state.context.snapshot());
        self.emit(
            RecordDraft::new(RecordTag::ActionFinish)
                .subject(spec.to_string())
                .context_delta(delta)
                .should_log(should_log),
        );
        Ok(())
    }

    /// Runs one calculator behavior with bracketing records.
    fn run_calculator(&mut self, spec: &BehaviorSpec) -> Result<(), StepError> {
        let machine = self.machine;
        let behavior = machine.registry.resolve_calculator(&spec.name)?;
        let should_log = behavior.should_log();
        self.state.context.ensure_keys(&spec.name, behavior.required_context())?;
        self.emit(
            RecordDraft::new(RecordTag::CalculatorStart)
                .subject(spec.to_string())
                .should_log(should_log),
        );

        let event = self.current_event();
        let before = self.state.context.snapshot();
        {
            let mut scope = CalculatorScope {
                context: &mut self.state.context,
                event: &event,
                active: &self.state.value,
                args: &spec.args,
            };
            behavior.calculate(&mut scope)?;
        }
        self.state.context.validate()?;
        let delta = context_delta(&before, &self.state.context.snapshot());
        self.emit(
            RecordDraft::new(RecordTag::CalculatorFinish)
                .subject(spec.to_string())
                .context_delta(delta)
                .should_log(should_log),
        );
        Ok(())
    }

    /// Evaluates one guard behavior with bracketing records.
    ///
    /// Returns whether the guard passed. Validation-flavored failures record
    /// the guard's message and abort the step.
    fn run_guard(&mut self, spec: &BehaviorSpec) -> Result<bool, StepError> {
        let machine = self.machine;
        let behavior = machine.registry.resolve_guard(&spec.name)?;
        let should_log = behavior.should_log();
        self.state.context.ensure_keys(&spec.name, behavior.required_context())?;
        self.emit(
            RecordDraft::new(RecordTag::GuardStart)
                .subject(spec.to_string())
                .should_log(should_log),
        );

        let event = self.current_event();
        let passed = {
            let scope = GuardScope {
                context: &self.state.context,
                event: &event,
                active: &self.state.value,
                args: &spec.args,
            };
            behavior.check(&scope)?
        };

        if passed {
            self.emit(
                RecordDraft::new(RecordTag::GuardPass)
                    .subject(spec.to_string())
                    .should_log(should_log),
            );
            return Ok(true);
        }

        match behavior.failure_message() {
            Some(message) => {
                let mut payload = Map::new();
                payload.insert(spec.name.clone(), Value::String(message.clone()));
                self.emit(
                    RecordDraft::new(RecordTag::GuardFail)
                        .subject(spec.to_string())
                        .payload(Value::Object(payload))
                        .should_log(should_log),
                );
                Err(StepError::Validation(ValidationError::Guard {
                    guard: spec.name.clone(),
                    message,
                }))
            }
            None => {
                self.emit(
                    RecordDraft::new(RecordTag::GuardFail)
                        .subject(spec.to_string())
                        .should_log(should_log),
                );
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Exit and entry chains
    // ------------------------------------------------------------------

    /// Performs the exit and entry chains of a taken transition.
    fn take_transition(
        &mut self,
        leaf: StateHandle,
        source: StateHandle,
        target: StateHandle,
    ) -> Result<(), StepError> {
        let machine = self.machine;

        let (top_exit, enter_path) = if source == target || machine.is_ancestor(target, source) {
            (Some(target), vec![target])
        } else {
            let source_chain = machine.path_to_root(source);
            let target_chain = machine.path_to_root(target);
            let domain = deepest_common(&source_chain, &target_chain).ok_or_else(|| {
                StepError::InvariantViolation("transition endpoints share no ancestor".to_string())
            })?;
            let top_exit = machine
                .path_to_root(leaf)
                .into_iter()
                .take_while(|handle| *handle != domain)
                .last();
            let enter_path: Vec<StateHandle> = target_chain
                .iter()
                .copied()
                .take_while(|handle| *handle != domain)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            (top_exit, enter_path)
        };

        let mut insert_at = self.state.value.len();
        if let Some(top) = top_exit {
            let exits = self.collect_exit_states(top, false);
            insert_at = self.perform_exits(&exits)?;
        }

        if let Some((first, rest)) = enter_path.split_first() {
            self.enter_node(*first, rest, &mut insert_at)?;
        }
        Ok(())
    }

    /// Collects the ordered list of states whose exit fires.
    ///
    /// Inside a parallel subtree only leaves and parallel roots fire exit
    /// actions; intermediate compounds (including the regions themselves)
    /// are skipped.
    fn collect_exit_states(&self, node: StateHandle, under_parallel: bool) -> Vec<StateHandle> {
        let machine = self.machine;
        let def = machine.state(node);
        match def.kind {
            StateKind::Atomic | StateKind::Final => {
                if self.is_active(node) {
                    vec![node]
                } else {
                    Vec::new()
                }
            }
            StateKind::Parallel => {
                let mut exits = Vec::new();
                for region in &def.children {
                    exits.extend(self.collect_exit_states(*region, true));
                }
                exits.push(node);
                exits
            }
            StateKind::Compound => {
                let mut exits = Vec::new();
                for child in &def.children {
                    if self.active_under(*child) {
                        exits.extend(self.collect_exit_states(*child, under_parallel));
                    }
                }
                if !under_parallel && !exits.is_empty() {
                    exits.push(node);
                }
                exits
            }
        }
    }

    /// Runs exit actions and records for the collected exit states.
    ///
    /// Returns the value index where replacement leaves are inserted.
    fn perform_exits(&mut self, exits: &[StateHandle]) -> Result<usize, StepError> {
        let machine = self.machine;
        let mut anchor = self.state.value.len();
        for handle in exits {
            let def = machine.state(*handle);
            let route = def.route.clone();
            let specs = def.exit.clone();
            let meta = def.meta.clone();
            let is_leaf = def.is_leaf();
            let id = def.id.clone();

            if !specs.is_empty() {
                self.emit(RecordDraft::new(RecordTag::StateExitStart).subject(route.clone()));
                for spec in &specs {
                    self.run_action(spec)?;
                }
                self.emit(RecordDraft::new(RecordTag::StateExitFinish).subject(route.clone()));
            }

            if is_leaf {
                if let Some(position) = self.state.value.iter().position(|active| *active == id) {
                    self.state.value.remove(position);
                    anchor = anchor.min(position);
                }
            }

            let snapshot = self.state.value.clone();
            self.emit(
                RecordDraft::new(RecordTag::StateExit)
                    .subject(route)
                    .state_value(snapshot)
                    .meta(meta),
            );
        }
        Ok(anchor.min(self.state.value.len()))
    }

    /// Enters a node, descending through initial children and regions.
    ///
    /// `rest` is the remaining explicit entry path toward a transition
    /// target; once exhausted, descent follows initial pointers.
    fn enter_node(
        &mut self,
        node: StateHandle,
        rest: &[StateHandle],
        insert_at: &mut usize,
    ) -> Result<(), StepError> {
        let machine = self.machine;
        let def = machine.state(node);
        let kind = def.kind;
        let route = def.route.clone();
        let specs = def.entry.clone();
        let meta = def.meta.clone();
        let id = def.id.clone();

        if def.is_region {
            self.emit(RecordDraft::new(RecordTag::ParallelRegionEnter).subject(route.clone()));
        } else {
            if !specs.is_empty() {
                self.emit(
                    RecordDraft::new(RecordTag::StateEntryStart).subject(route.clone()),
                );
                for spec in &specs {
                    self.run_action(spec)?;
                }
                self.emit(
                    RecordDraft::new(RecordTag::StateEntryFinish).subject(route.clone()),
                );
            }

            if matches!(kind, StateKind::Atomic | StateKind::Final) {
                let position = (*insert_at).min(self.state.value.len());
                self.state.value.insert(position, id);
                *insert_at = position + 1;
                self.changed_leaves.push(node);
            }

            let snapshot = self.state.value.clone();
            self.emit(
                RecordDraft::new(RecordTag::StateEnter)
                    .subject(route)
                    .state_value(snapshot)
                    .meta(meta),
            );
        }

        match kind {
            StateKind::Atomic | StateKind::Final => Ok(()),
            StateKind::Compound => {
                let next = match rest.split_first() {
                    Some((first, remaining))
                        if machine.state(*first).parent == Some(node) =>
                    {
                        return self.enter_node(*first, remaining, insert_at);
                    }
                    _ => machine.state(node).initial.ok_or_else(|| {
                        StepError::InvariantViolation(format!(
                            "compound state `{}` without initial",
                            machine.state(node).id
                        ))
                    })?,
                };
                self.enter_node(next, &[], insert_at)
            }
            StateKind::Parallel => {
                let regions = machine.state(node).children.clone();
                for region in regions {
                    match rest.split_first() {
                        Some((next, remaining)) if *next == region => {
                            self.enter_node(region, remaining, insert_at)?;
                        }
                        _ => {
                            self.enter_node(region, &[], insert_at)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Run-to-completion loop
    // ------------------------------------------------------------------

    /// Drives always-transitions, raised events, and completion events until
    /// quiescence, then performs the finish check.
    fn run_to_completion(&mut self) -> Result<(), StepError> {
        loop {
            self.microsteps += 1;
            if self.microsteps > self.config.max_microsteps {
                return Err(StepError::InvariantViolation(format!(
                    "step exceeded {} micro-steps without quiescing",
                    self.config.max_microsteps
                )));
            }

            if let Some((leaf, source)) = self.find_always()? {
                self.state.current_event = Some(Event::new(ALWAYS_EVENT));
                self.micro_transition(leaf, source)?;
                continue;
            }

            if let Some(input) = self.queue.dequeue() {
                let event = self.validate_input(input)?;
                let should_log = self
                    .machine
                    .registry
                    .event_definition(&event.event_type)
                    .is_none_or(|definition| definition.should_log);
                self.emit(
                    RecordDraft::new(RecordTag::EventRaised)
                        .subject(event.event_type.as_str())
                        .event_type(event.event_type.clone())
                        .should_log(should_log),
                );
                self.dispatch(event, false)?;
                continue;
            }

            if let Some(done) = self.pending_done.pop_front() {
                let def = self.machine.state(done);
                let id = def.id.clone();
                if matches!(def.kind, StateKind::Parallel) {
                    let route = def.route.clone();
                    self.emit(RecordDraft::new(RecordTag::ParallelDone).subject(route));
                }
                let event = Event::new(completion_event(&id));
                self.dispatch(event, false)?;
                continue;
            }

            break;
        }

        self.finish_check();
        Ok(())
    }

    /// Finds the first active leaf with a reachable always-transition.
    fn find_always(&mut self) -> Result<Option<(StateHandle, StateHandle)>, StepError> {
        let leaves = self.active_handles()?;
        let always = EventType::new(ALWAYS_EVENT);
        for leaf in leaves {
            if let Some(source) = selector::bubble(self.machine, leaf, &always) {
                if self.always_blocked.contains(&source) {
                    continue;
                }
                return Ok(Some((leaf, source)));
            }
        }
        Ok(None)
    }

    /// Queues completion events for done ancestors of changed leaves.
    fn collect_done_ancestors(&mut self) {
        let machine = self.machine;
        let changed = std::mem::take(&mut self.changed_leaves);
        for leaf in changed {
            for ancestor in machine.path_to_root(leaf).into_iter().skip(1) {
                if self.done_fired.contains(&ancestor) {
                    continue;
                }
                if !self.is_done(ancestor) {
                    continue;
                }
                let def = machine.state(ancestor);
                let listens = matches!(def.kind, StateKind::Parallel)
                    || def.transitions.contains_key(&completion_event(&def.id));
                if listens {
                    self.done_fired.insert(ancestor);
                    self.pending_done.push_back(ancestor);
                }
            }
        }
    }

    /// Returns true when a compound or parallel state is done.
    ///
    /// A compound state is done when its active direct child is a final leaf;
    /// a parallel state is done when every region is done.
    fn is_done(&self, node: StateHandle) -> bool {
        let machine = self.machine;
        let def = machine.state(node);
        match def.kind {
            StateKind::Atomic | StateKind::Final => false,
            StateKind::Compound => def.children.iter().any(|child| {
                machine.state(*child).is_final() && self.is_active(*child)
            }),
            StateKind::Parallel => def.children.iter().all(|region| self.is_done(*region)),
        }
    }

    /// Emits MACHINE_FINISH when the active configuration is fully final.
    fn finish_check(&mut self) {
        if self.state.status != RunStatus::Running || self.state.value.is_empty() {
            return;
        }
        let all_final = self.state.value.iter().all(|id| {
            self.machine
                .resolve_id(id.as_str())
                .is_some_and(|handle| self.machine.state(handle).is_final())
        });
        if all_final {
            let snapshot = self.state.value.clone();
            self.emit(
                RecordDraft::new(RecordTag::MachineFinish)
                    .subject(self.machine.id.as_str())
                    .state_value(snapshot),
            );
            self.state.status = RunStatus::Done;
        }
    }
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Builds the `route.EVENT` subject for transition records.
fn transition_subject(route: &str, event_type: &EventType) -> String {
    if route.is_empty() {
        event_type.as_str().to_string()
    } else {
        format!("{route}.{event_type}")
    }
}

/// Returns the deepest handle present in both root-bound chains.
fn deepest_common(left: &[StateHandle], right: &[StateHandle]) -> Option<StateHandle> {
    left.iter().copied().find(|handle| right.contains(handle))
}
