// crates/statechart-core/src/core/record.rs
// ============================================================================
// Module: Statechart Internal Event Records
// Description: Ordered log rows describing everything the interpreter did.
// Purpose: Reify the interpreter's trace into persistable, replayable records.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! Every interesting interpreter action is recorded in execution order:
//! machine lifecycle, state entry/exit, transition selection, behavior
//! invocations, and raised events. Records are append-only, sequence-numbered
//! within a run, and anchored by the root event id assigned when the run
//! starts. External persistence honors the `should_log` flag; restoration
//! folds `state_value` and `context_delta` fields back into a live state.
//!
//! Record times are host-supplied: the caller stamps each step request, and
//! the engine copies that stamp onto every record the step emits. The core
//! never reads wall-clock time, which keeps replay deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::EventType;
use crate::core::identifiers::MachineId;
use crate::core::identifiers::RootEventId;
use crate::core::identifiers::StateId;

// ============================================================================
// SECTION: Step Time
// ============================================================================

/// Host-supplied time stamped onto a step's records.
///
/// # Invariants
/// - Values are explicitly provided by callers; no validation is performed
///   and monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepTime {
    /// Unix epoch milliseconds from the host clock.
    Millis(i64),
    /// Monotonic logical tick for clockless replay and tests.
    Tick(u64),
}

impl StepTime {
    /// Returns the stamp as unix milliseconds when available.
    #[must_use]
    pub const fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(value) => Some(*value),
            Self::Tick(_) => None,
        }
    }

    /// Returns the stamp as a logical tick when available.
    #[must_use]
    pub const fn as_tick(&self) -> Option<u64> {
        match self {
            Self::Millis(_) => None,
            Self::Tick(value) => Some(*value),
        }
    }
}

// ============================================================================
// SECTION: Record Tags
// ============================================================================

/// Interpreter-internal record type tags.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordTag {
    /// A run started.
    MachineStart,
    /// The machine reached a final configuration.
    MachineFinish,
    /// A state became active.
    StateEnter,
    /// A state became inactive.
    StateExit,
    /// Entry actions of a state began.
    StateEntryStart,
    /// Entry actions of a state completed.
    StateEntryFinish,
    /// Exit actions of a state began.
    StateExitStart,
    /// Exit actions of a state completed.
    StateExitFinish,
    /// A parallel region is being entered.
    ParallelRegionEnter,
    /// Every region of a parallel state reached a final leaf.
    ParallelDone,
    /// Transition processing for an event began.
    TransitionStart,
    /// A transition branch completed its actions.
    TransitionFinish,
    /// No branch of a matched transition passed its guards.
    TransitionFail,
    /// A transition or entry/exit action began.
    ActionStart,
    /// A transition or entry/exit action completed.
    ActionFinish,
    /// A guard evaluation began.
    GuardStart,
    /// A guard passed.
    GuardPass,
    /// A guard failed.
    GuardFail,
    /// A calculator began.
    CalculatorStart,
    /// A calculator completed.
    CalculatorFinish,
    /// An internally-raised event was dequeued for processing.
    EventRaised,
}

// ============================================================================
// SECTION: Internal Event Record
// ============================================================================

/// One log row describing something the interpreter did.
///
/// # Invariants
/// - `seq` is monotonic within a run; the first record of a run has `seq == 1`.
/// - Records are emitted in execution order and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalEventRecord {
    /// Root event identifier anchoring the run.
    pub root_event_id: RootEventId,
    /// Monotonic sequence number within the run.
    pub seq: u64,
    /// Machine identifier.
    pub machine_id: MachineId,
    /// Interpreter-internal type tag.
    pub tag: RecordTag,
    /// User event type being processed, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    /// State route, behavior name, or event type the record refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Optional structured payload (e.g. guard errors keyed by guard name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Active leaf set after the recorded action, for state-change tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_value: Option<Vec<StateId>>,
    /// Context keys changed by the recorded action (removals as null).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_delta: Option<BTreeMap<String, Value>>,
    /// Opaque metadata surfaced from the definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Whether external persistence should store this record.
    pub should_log: bool,
    /// Time stamp supplied by the step request.
    pub created_at: StepTime,
}
