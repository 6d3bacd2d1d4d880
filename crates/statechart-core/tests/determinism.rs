// crates/statechart-core/tests/determinism.rs
// ============================================================================
// Module: Determinism Tests
// Description: Property tests for replay determinism of steps and records.
// ============================================================================
//! ## Overview
//! For the same machine definition, initial state, and event sequence, the
//! final state and record log must be identical bit-for-bit. Events that no
//! state handles are skipped without advancing the run.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use statechart_core::compile;
use statechart_core::BehaviorError;
use statechart_core::BehaviorRegistry;
use statechart_core::InMemoryHistoryStore;
use statechart_core::Interpreter;
use statechart_core::MachineConfig;
use statechart_core::RootEventId;
use statechart_core::State;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

/// Builds the traffic machine used by the property tests.
fn traffic_machine() -> Arc<statechart_core::MachineDefinition> {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("bump", |scope| {
        let count = scope
            .context
            .get("count")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| BehaviorError::failed("count must be an integer"))?;
        scope.context.set("count", json!(count + 1));
        Ok(())
    });
    registry.guard_fn("under_limit", |scope| {
        Ok(scope
            .context
            .get("count")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|count| count < 100))
    });
    Arc::new(
        compile(
            config(json!({
                "id": "traffic",
                "context": { "count": 0 },
                "initial": "red",
                "states": {
                    "red": { "on": { "TIMER": { "target": "green", "actions": ["bump"] } } },
                    "green": {
                        "on": {
                            "TIMER": { "target": "yellow", "guards": ["under_limit"] },
                            "HOLD": null
                        }
                    },
                    "yellow": { "on": { "TIMER": "red" } }
                }
            })),
            registry,
        )
        .expect("machine must compile"),
    )
}

/// Replays an event sequence from a fresh run, skipping unhandled events.
fn replay(machine: &Arc<statechart_core::MachineDefinition>, events: &[String]) -> State {
    let interpreter = Interpreter::new(Arc::clone(machine), InMemoryHistoryStore::new());
    let mut state = interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("replay"),
            time: StepTime::Tick(0),
            event: None,
        })
        .expect("initial state must materialize");
    for (offset, event) in events.iter().enumerate() {
        let time = StepTime::Tick(1 + offset as u64);
        if let Ok(next) = interpreter.transition(&state, event.as_str(), time) {
            state = next;
        }
    }
    state
}

// ============================================================================
// SECTION: Determinism Properties
// ============================================================================

proptest! {
    /// Replays of the same event sequence produce identical states and logs.
    #[test]
    fn prop_replay_is_deterministic(
        events in proptest::collection::vec(
            prop::sample::select(vec![
                "TIMER".to_string(),
                "HOLD".to_string(),
                "UNKNOWN".to_string(),
            ]),
            0..24,
        )
    ) {
        let machine = traffic_machine();
        let first = replay(&machine, &events);
        let second = replay(&machine, &events);

        prop_assert_eq!(&first.value, &second.value);
        prop_assert_eq!(first.context.values(), second.context.values());
        prop_assert_eq!(&first.records, &second.records);
        prop_assert_eq!(first.seq, second.seq);
    }

    /// Sequence numbers are dense and strictly increasing from one.
    #[test]
    fn prop_sequence_numbers_are_dense(
        events in proptest::collection::vec(
            prop::sample::select(vec!["TIMER".to_string(), "HOLD".to_string()]),
            0..24,
        )
    ) {
        let machine = traffic_machine();
        let state = replay(&machine, &events);
        for (index, record) in state.records.iter().enumerate() {
            prop_assert_eq!(record.seq, index as u64 + 1);
        }
    }
}

// ============================================================================
// SECTION: Record Stability
// ============================================================================

/// Tests that two interpreters over the same definition agree exactly.
#[test]
fn test_interpreters_share_definitions_deterministically() {
    let machine = traffic_machine();
    let events: Vec<String> =
        vec!["TIMER".into(), "TIMER".into(), "HOLD".into(), "TIMER".into(), "TIMER".into()];
    let first = replay(&machine, &events);
    let second = replay(&machine, &events);
    assert_eq!(first, second);
}
