// crates/statechart-core/src/core/state.rs
// ============================================================================
// Module: Statechart Runtime State
// Description: Snapshot passed into, and produced by, one RTC step.
// Purpose: Carry the active leaf set, context, and record log of a run.
// Dependencies: crate::core::{context, event, identifiers, record}, serde
// ============================================================================

//! ## Overview
//! A runtime state is the snapshot the step engine consumes and produces: the
//! set of active atomic/final state ids (a singleton for non-parallel
//! machines), the context store, the current event, and the append-only list
//! of internal event records accumulated during the run.
//!
//! States are owned exclusively by one step at a time; the machine definition
//! they execute against is shared and immutable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::context::Context;
use crate::core::event::Event;
use crate::core::identifiers::MachineId;
use crate::core::identifiers::RootEventId;
use crate::core::identifiers::StateId;
use crate::core::record::InternalEventRecord;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is active and accepting events.
    Running,
    /// The machine reached a final configuration.
    Done,
}

// ============================================================================
// SECTION: Runtime State
// ============================================================================

/// Snapshot of a run between (and during) RTC steps.
///
/// # Invariants
/// - Every element of `value` is an atomic or final state id consistent with
///   the machine hierarchy (exactly one active leaf per compound region).
/// - `seq` is the sequence number of the last record emitted for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Root event identifier anchoring the run.
    pub root_event_id: RootEventId,
    /// Machine identifier the state belongs to.
    pub machine_id: MachineId,
    /// Path delimiter of the machine definition.
    pub delimiter: String,
    /// Active leaf ids in region declaration order.
    pub value: Vec<StateId>,
    /// Context store carried with the run.
    pub context: Context,
    /// Event attached by the current or most recent step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_event: Option<Event>,
    /// Internal event records appended during this run.
    pub records: Vec<InternalEventRecord>,
    /// Last assigned record sequence number.
    pub seq: u64,
    /// Run lifecycle status.
    pub status: RunStatus,
}

impl State {
    /// Returns the set of fully-qualified active leaf ids.
    #[must_use]
    pub fn current_value(&self) -> BTreeSet<StateId> {
        self.value.iter().cloned().collect()
    }

    /// Returns the dotted routes of the active leaves, machine id excluded.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        self.value.iter().map(|id| self.route_of(id)).collect()
    }

    /// Returns true when a dotted path matches the active configuration.
    ///
    /// The comparison is prefix-based on routes excluding the machine id: the
    /// path matches when it equals an active leaf route, names one of its
    /// ancestors, or descends from one of the active leaves.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.value.iter().any(|id| {
            let route = self.route_of(id);
            route == path
                || route.starts_with(&format!("{path}{}", self.delimiter))
                || path.starts_with(&format!("{route}{}", self.delimiter))
        })
    }

    /// Strips the machine id prefix from a fully-qualified state id.
    fn route_of(&self, id: &StateId) -> String {
        let prefix = format!("{}{}", self.machine_id, self.delimiter);
        id.as_str().strip_prefix(&prefix).unwrap_or(id.as_str()).to_string()
    }
}
