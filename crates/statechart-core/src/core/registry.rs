// crates/statechart-core/src/core/registry.rs
// ============================================================================
// Module: Statechart Behavior Registry
// Description: Resolution of symbolic behavior names to invokable units.
// Purpose: Hold the action, guard, calculator, event, and result tables.
// Dependencies: crate::core::{context, event, identifiers}, serde_json
// ============================================================================

//! ## Overview
//! The behavior registry maps the symbolic names a configuration references
//! to invokable units. Behaviors come in two call shapes: inline closures
//! registered under a name, and self-describing invokable units exposing
//! their type name, logging preference, and required context keys.
//!
//! Invocation passes scope structs exposing exactly the collaborators a
//! behavior may use: the context store, the current event, the active state
//! view, the positional argument strings of its spec, and (for actions) a
//! raise sink borrowing the step's event queue. Unknown names fail closed
//! with [`BehaviorError::NotFound`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::context::Context;
use crate::core::context::ContextSchema;
use crate::core::event::Event;
use crate::core::event::EventDefinition;
use crate::core::event::EventInput;
use crate::core::identifiers::EventType;
use crate::core::identifiers::StateId;

// ============================================================================
// SECTION: Raise Sink
// ============================================================================

/// Sink accepting internally-raised events.
///
/// The step engine passes a short-lived borrow of its event queue; behaviors
/// never hold ambient references to the queue.
pub trait RaiseSink {
    /// Enqueues an event for processing later in the same step.
    fn raise(&mut self, event: EventInput);
}

// ============================================================================
// SECTION: Invocation Scopes
// ============================================================================

/// Scope passed to action behaviors.
pub struct ActionScope<'a> {
    /// Mutable context store.
    pub context: &'a mut Context,
    /// Event being processed.
    pub event: &'a Event,
    /// Active leaf ids of the current state value.
    pub active: &'a [StateId],
    /// Positional argument strings from the behavior spec.
    pub args: &'a [String],
    /// Raise sink borrowing the step's event queue.
    pub raise: &'a mut dyn RaiseSink,
}

impl ActionScope<'_> {
    /// Raises an event into the step's queue.
    pub fn raise(&mut self, event: impl Into<EventInput>) {
        self.raise.raise(event.into());
    }
}

/// Scope passed to guard behaviors.
pub struct GuardScope<'a> {
    /// Immutable context store.
    pub context: &'a Context,
    /// Event being processed.
    pub event: &'a Event,
    /// Active leaf ids of the current state value.
    pub active: &'a [StateId],
    /// Positional argument strings from the behavior spec.
    pub args: &'a [String],
}

/// Scope passed to calculator behaviors.
pub struct CalculatorScope<'a> {
    /// Mutable context store.
    pub context: &'a mut Context,
    /// Event being processed.
    pub event: &'a Event,
    /// Active leaf ids of the current state value.
    pub active: &'a [StateId],
    /// Positional argument strings from the behavior spec.
    pub args: &'a [String],
}

/// Scope passed to result extractor behaviors.
pub struct ResultScope<'a> {
    /// Immutable context store.
    pub context: &'a Context,
    /// Active leaf ids of the final state value.
    pub active: &'a [StateId],
    /// Positional argument strings from the behavior spec.
    pub args: &'a [String],
}

// ============================================================================
// SECTION: Invokable Units
// ============================================================================

/// Self-describing action unit.
pub trait ActionUnit: Send + Sync {
    /// Returns the registered type name of the unit.
    fn behavior_type(&self) -> &str;

    /// Whether records for this behavior should be persisted.
    fn should_log(&self) -> bool {
        true
    }

    /// Context keys that must exist before the unit runs.
    fn required_context(&self) -> &[&str] {
        &[]
    }

    /// Invokes the action.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when the action fails.
    fn invoke(&self, scope: &mut ActionScope<'_>) -> Result<(), BehaviorError>;
}

/// Self-describing guard unit.
///
/// Guards come in two flavors: plain guards return a boolean; validation
/// guards additionally expose a human-readable failure message through
/// [`GuardUnit::failure_message`], which the engine surfaces as a
/// validation error and records under the guard's name.
pub trait GuardUnit: Send + Sync {
    /// Returns the registered type name of the unit.
    fn behavior_type(&self) -> &str;

    /// Whether records for this behavior should be persisted.
    fn should_log(&self) -> bool {
        true
    }

    /// Context keys that must exist before the unit runs.
    fn required_context(&self) -> &[&str] {
        &[]
    }

    /// Evaluates the guard.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when evaluation itself fails (distinct from
    /// the guard returning false).
    fn check(&self, scope: &GuardScope<'_>) -> Result<bool, BehaviorError>;

    /// Failure message marking the guard as validation-flavored.
    fn failure_message(&self) -> Option<String> {
        None
    }
}

/// Self-describing calculator unit.
pub trait CalculatorUnit: Send + Sync {
    /// Returns the registered type name of the unit.
    fn behavior_type(&self) -> &str;

    /// Whether records for this behavior should be persisted.
    fn should_log(&self) -> bool {
        true
    }

    /// Context keys that must exist before the unit runs.
    fn required_context(&self) -> &[&str] {
        &[]
    }

    /// Runs the calculator.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when the calculation fails.
    fn calculate(&self, scope: &mut CalculatorScope<'_>) -> Result<(), BehaviorError>;
}

/// Self-describing result extractor unit.
pub trait ResultUnit: Send + Sync {
    /// Returns the registered type name of the unit.
    fn behavior_type(&self) -> &str;

    /// Extracts the machine result value.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when extraction fails.
    fn extract(&self, scope: &ResultScope<'_>) -> Result<Value, BehaviorError>;
}

// ============================================================================
// SECTION: Inline Closure Shapes
// ============================================================================

/// Inline action closure shape.
pub type ActionFn = dyn Fn(&mut ActionScope<'_>) -> Result<(), BehaviorError> + Send + Sync;

/// Inline guard closure shape.
pub type GuardFn = dyn Fn(&GuardScope<'_>) -> Result<bool, BehaviorError> + Send + Sync;

/// Inline calculator closure shape.
pub type CalculatorFn = dyn Fn(&mut CalculatorScope<'_>) -> Result<(), BehaviorError> + Send + Sync;

/// Inline result extractor closure shape.
pub type ResultFn = dyn Fn(&ResultScope<'_>) -> Result<Value, BehaviorError> + Send + Sync;

// ============================================================================
// SECTION: Behavior Variants
// ============================================================================

/// Action behavior: inline closure or invokable unit.
#[derive(Clone)]
pub enum ActionBehavior {
    /// Inline closure registered under a name.
    Inline(Arc<ActionFn>),
    /// Self-describing invokable unit.
    Invokable(Arc<dyn ActionUnit>),
}

impl ActionBehavior {
    /// Invokes the action through its uniform call shape.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when the action fails.
    pub fn invoke(&self, scope: &mut ActionScope<'_>) -> Result<(), BehaviorError> {
        match self {
            Self::Inline(closure) => closure(scope),
            Self::Invokable(unit) => unit.invoke(scope),
        }
    }

    /// Whether records for this behavior should be persisted.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Inline(_) => true,
            Self::Invokable(unit) => unit.should_log(),
        }
    }

    /// Context keys that must exist before the behavior runs.
    #[must_use]
    pub fn required_context(&self) -> &[&str] {
        match self {
            Self::Inline(_) => &[],
            Self::Invokable(unit) => unit.required_context(),
        }
    }
}

/// Guard behavior: inline closure or invokable unit.
#[derive(Clone)]
pub enum GuardBehavior {
    /// Inline closure registered under a name.
    Inline(Arc<GuardFn>),
    /// Self-describing invokable unit.
    Invokable(Arc<dyn GuardUnit>),
}

impl fmt::Debug for GuardBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("GuardBehavior::Inline(..)"),
            Self::Invokable(_) => f.write_str("GuardBehavior::Invokable(..)"),
        }
    }
}

impl GuardBehavior {
    /// Evaluates the guard through its uniform call shape.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when evaluation itself fails.
    pub fn check(&self, scope: &GuardScope<'_>) -> Result<bool, BehaviorError> {
        match self {
            Self::Inline(closure) => closure(scope),
            Self::Invokable(unit) => unit.check(scope),
        }
    }

    /// Whether records for this behavior should be persisted.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Inline(_) => true,
            Self::Invokable(unit) => unit.should_log(),
        }
    }

    /// Context keys that must exist before the behavior runs.
    #[must_use]
    pub fn required_context(&self) -> &[&str] {
        match self {
            Self::Inline(_) => &[],
            Self::Invokable(unit) => unit.required_context(),
        }
    }

    /// Failure message when the guard is validation-flavored.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Inline(_) => None,
            Self::Invokable(unit) => unit.failure_message(),
        }
    }
}

/// Calculator behavior: inline closure or invokable unit.
#[derive(Clone)]
pub enum CalculatorBehavior {
    /// Inline closure registered under a name.
    Inline(Arc<CalculatorFn>),
    /// Self-describing invokable unit.
    Invokable(Arc<dyn CalculatorUnit>),
}

impl CalculatorBehavior {
    /// Runs the calculator through its uniform call shape.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when the calculation fails.
    pub fn calculate(&self, scope: &mut CalculatorScope<'_>) -> Result<(), BehaviorError> {
        match self {
            Self::Inline(closure) => closure(scope),
            Self::Invokable(unit) => unit.calculate(scope),
        }
    }

    /// Whether records for this behavior should be persisted.
    #[must_use]
    pub fn should_log(&self) -> bool {
        match self {
            Self::Inline(_) => true,
            Self::Invokable(unit) => unit.should_log(),
        }
    }

    /// Context keys that must exist before the behavior runs.
    #[must_use]
    pub fn required_context(&self) -> &[&str] {
        match self {
            Self::Inline(_) => &[],
            Self::Invokable(unit) => unit.required_context(),
        }
    }
}

/// Result behavior: inline closure or invokable unit.
#[derive(Clone)]
pub enum ResultBehavior {
    /// Inline closure registered under a name.
    Inline(Arc<ResultFn>),
    /// Self-describing invokable unit.
    Invokable(Arc<dyn ResultUnit>),
}

impl ResultBehavior {
    /// Extracts the machine result through its uniform call shape.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError`] when extraction fails.
    pub fn extract(&self, scope: &ResultScope<'_>) -> Result<Value, BehaviorError> {
        match self {
            Self::Inline(closure) => closure(scope),
            Self::Invokable(unit) => unit.extract(scope),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Behavior table kinds, used in resolution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    /// Action table.
    Action,
    /// Guard table.
    Guard,
    /// Calculator table.
    Calculator,
    /// Result extractor table.
    Result,
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Action => "action",
            Self::Guard => "guard",
            Self::Calculator => "calculator",
            Self::Result => "result",
        };
        f.write_str(label)
    }
}

/// Errors raised when resolving or invoking behaviors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BehaviorError {
    /// A symbolic behavior name is not registered.
    #[error("{kind} behavior `{name}` is not registered")]
    NotFound {
        /// Table the lookup targeted.
        kind: BehaviorKind,
        /// Unresolved behavior name.
        name: String,
    },
    /// A behavior invocation failed.
    #[error("behavior failed: {message}")]
    Failed {
        /// Failure message produced by the behavior.
        message: String,
    },
}

impl BehaviorError {
    /// Creates an invocation failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Behavior Registry
// ============================================================================

/// Keyed behavior tables resolved against during compilation and steps.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    /// Action table.
    actions: BTreeMap<String, ActionBehavior>,
    /// Guard table.
    guards: BTreeMap<String, GuardBehavior>,
    /// Calculator table.
    calculators: BTreeMap<String, CalculatorBehavior>,
    /// Result extractor table.
    results: BTreeMap<String, ResultBehavior>,
    /// Event definitions keyed by event type.
    events: BTreeMap<EventType, EventDefinition>,
    /// Optional typed context shape.
    context_schema: Option<Arc<ContextSchema>>,
}

impl BehaviorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an inline action closure under a name.
    pub fn action_fn<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&mut ActionScope<'_>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), ActionBehavior::Inline(Arc::new(action)));
        self
    }

    /// Registers an invokable action unit under its own type name.
    pub fn action_unit(&mut self, unit: Arc<dyn ActionUnit>) -> &mut Self {
        self.actions.insert(unit.behavior_type().to_string(), ActionBehavior::Invokable(unit));
        self
    }

    /// Registers an inline guard closure under a name.
    pub fn guard_fn<F>(&mut self, name: impl Into<String>, guard: F) -> &mut Self
    where
        F: Fn(&GuardScope<'_>) -> Result<bool, BehaviorError> + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), GuardBehavior::Inline(Arc::new(guard)));
        self
    }

    /// Registers an invokable guard unit under its own type name.
    pub fn guard_unit(&mut self, unit: Arc<dyn GuardUnit>) -> &mut Self {
        self.guards.insert(unit.behavior_type().to_string(), GuardBehavior::Invokable(unit));
        self
    }

    /// Registers an inline calculator closure under a name.
    pub fn calculator_fn<F>(&mut self, name: impl Into<String>, calculator: F) -> &mut Self
    where
        F: Fn(&mut CalculatorScope<'_>) -> Result<(), BehaviorError> + Send + Sync + 'static,
    {
        self.calculators.insert(name.into(), CalculatorBehavior::Inline(Arc::new(calculator)));
        self
    }

    /// Registers an invokable calculator unit under its own type name.
    pub fn calculator_unit(&mut self, unit: Arc<dyn CalculatorUnit>) -> &mut Self {
        self.calculators
            .insert(unit.behavior_type().to_string(), CalculatorBehavior::Invokable(unit));
        self
    }

    /// Registers an inline result extractor closure under a name.
    pub fn result_fn<F>(&mut self, name: impl Into<String>, result: F) -> &mut Self
    where
        F: Fn(&ResultScope<'_>) -> Result<Value, BehaviorError> + Send + Sync + 'static,
    {
        self.results.insert(name.into(), ResultBehavior::Inline(Arc::new(result)));
        self
    }

    /// Registers an invokable result extractor unit under its own type name.
    pub fn result_unit(&mut self, unit: Arc<dyn ResultUnit>) -> &mut Self {
        self.results.insert(unit.behavior_type().to_string(), ResultBehavior::Invokable(unit));
        self
    }

    /// Registers an event definition under its declared event type.
    pub fn event(&mut self, definition: EventDefinition) -> &mut Self {
        self.events.insert(definition.event_type.clone(), definition);
        self
    }

    /// Installs the typed context shape.
    pub fn context_schema(&mut self, schema: ContextSchema) -> &mut Self {
        self.context_schema = Some(Arc::new(schema));
        self
    }

    /// Resolves an action by name.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError::NotFound`] when the name is unregistered.
    pub fn resolve_action(&self, name: &str) -> Result<&ActionBehavior, BehaviorError> {
        self.actions.get(name).ok_or_else(|| BehaviorError::NotFound {
            kind: BehaviorKind::Action,
            name: name.to_string(),
        })
    }

    /// Resolves a guard by name.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError::NotFound`] when the name is unregistered.
    pub fn resolve_guard(&self, name: &str) -> Result<&GuardBehavior, BehaviorError> {
        self.guards.get(name).ok_or_else(|| BehaviorError::NotFound {
            kind: BehaviorKind::Guard,
            name: name.to_string(),
        })
    }

    /// Resolves a calculator by name.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError::NotFound`] when the name is unregistered.
    pub fn resolve_calculator(&self, name: &str) -> Result<&CalculatorBehavior, BehaviorError> {
        self.calculators.get(name).ok_or_else(|| BehaviorError::NotFound {
            kind: BehaviorKind::Calculator,
            name: name.to_string(),
        })
    }

    /// Resolves a result extractor by name.
    ///
    /// # Errors
    ///
    /// Returns [`BehaviorError::NotFound`] when the name is unregistered.
    pub fn resolve_result(&self, name: &str) -> Result<&ResultBehavior, BehaviorError> {
        self.results.get(name).ok_or_else(|| BehaviorError::NotFound {
            kind: BehaviorKind::Result,
            name: name.to_string(),
        })
    }

    /// Returns the event definition for an event type, when registered.
    #[must_use]
    pub fn event_definition(&self, event_type: &EventType) -> Option<&EventDefinition> {
        self.events.get(event_type)
    }

    /// Returns the typed context shape, when installed.
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<ContextSchema>> {
        self.context_schema.as_ref()
    }

    /// Returns true when an action name is registered.
    #[must_use]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Returns true when a guard name is registered.
    #[must_use]
    pub fn has_guard(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }

    /// Returns true when a calculator name is registered.
    #[must_use]
    pub fn has_calculator(&self, name: &str) -> bool {
        self.calculators.contains_key(name)
    }

    /// Returns true when a result extractor name is registered.
    #[must_use]
    pub fn has_result(&self, name: &str) -> bool {
        self.results.contains_key(name)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .field("calculators", &self.calculators.keys().collect::<Vec<_>>())
            .field("results", &self.results.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
