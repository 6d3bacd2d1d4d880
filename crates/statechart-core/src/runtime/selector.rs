// crates/statechart-core/src/runtime/selector.rs
// ============================================================================
// Module: Statechart Transition Selector
// Description: Transition lookup under bubbling and parallel broadcast.
// Purpose: Map (active leaves, event type) to the transitions to execute.
// Dependencies: crate::core::definition
// ============================================================================

//! ## Overview
//! Selection starts at each active leaf and bubbles up the ancestor chain
//! until a state defines a transition for the incoming event type; the
//! nearest ancestor wins. For parallel configurations the event is broadcast
//! to every active leaf independently and the matches execute in the stable
//! declaration order of their source regions. Branch arbitration (calculators
//! then guards) is effectful and record-producing, so it runs inside the step
//! engine; this module owns the pure lookup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::definition::MachineDefinition;
use crate::core::definition::StateHandle;
use crate::core::identifiers::EventType;

// ============================================================================
// SECTION: Selection Results
// ============================================================================

/// One matched transition produced by broadcast selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedTransition {
    /// Active leaf the bubbling lookup started from.
    pub leaf: StateHandle,
    /// State that defines the matched transition (the leaf or an ancestor).
    pub source: StateHandle,
}

// ============================================================================
// SECTION: Bubbling Lookup
// ============================================================================

/// Finds the nearest state on the leaf's ancestor chain handling the event.
///
/// Returns the handle of the defining state; the transition itself is read
/// back from the definition by the caller.
#[must_use]
pub fn bubble(
    machine: &MachineDefinition,
    leaf: StateHandle,
    event_type: &EventType,
) -> Option<StateHandle> {
    let mut cursor = Some(leaf);
    while let Some(handle) = cursor {
        if machine.state(handle).transition_for(event_type).is_some() {
            return Some(handle);
        }
        cursor = machine.state(handle).parent;
    }
    None
}

// ============================================================================
// SECTION: Parallel Broadcast
// ============================================================================

/// Broadcasts an event to every active leaf and collects the matches.
///
/// Matches keep the declaration order of their source regions (the order of
/// the active leaf vector). When several leaves bubble to the same defining
/// state, the transition is claimed once by the first leaf in order.
#[must_use]
pub fn broadcast(
    machine: &MachineDefinition,
    leaves: &[StateHandle],
    event_type: &EventType,
) -> Vec<SelectedTransition> {
    let mut matches: Vec<SelectedTransition> = Vec::new();
    for leaf in leaves {
        if let Some(source) = bubble(machine, *leaf, event_type) {
            if matches.iter().any(|existing| existing.source == source) {
                continue;
            }
            matches.push(SelectedTransition {
                leaf: *leaf,
                source,
            });
        }
    }
    matches
}
