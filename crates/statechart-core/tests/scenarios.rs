// crates/statechart-core/tests/scenarios.rs
// ============================================================================
// Module: Scenario Overlay Tests
// Description: Tests for scenario-aware state resolution.
// ============================================================================
//! ## Overview
//! Validates that a context-selected scenario overlay takes precedence when
//! resolving the current state, both at machine start and at step time, and
//! that machines without the context key behave normally.

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

use serde_json::json;
use statechart_core::compile;
use statechart_core::BehaviorRegistry;
use statechart_core::InMemoryHistoryStore;
use statechart_core::Interpreter;
use statechart_core::MachineConfig;
use statechart_core::RootEventId;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

/// Delivery machine with a holiday scenario overlay for its start state.
fn delivery_config(scenario: Option<&str>) -> MachineConfig {
    let mut context = json!({});
    if let Some(name) = scenario {
        context = json!({ "scenarioType": name });
    }
    config(json!({
        "id": "delivery",
        "context": context,
        "initial": "start",
        "scenarios_enabled": true,
        "states": {
            "start": { "on": { "GO": "dispatched" } },
            "dispatched": {}
        },
        "scenarios": {
            "holiday": {
                "states": {
                    "start": { "on": { "GO": "queued" } },
                    "queued": {}
                }
            }
        }
    }))
}

/// Starts a run with a logical timestamp.
fn start(interpreter: &Interpreter<InMemoryHistoryStore>) -> statechart_core::State {
    interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize")
}

// ============================================================================
// SECTION: Overlay Resolution
// ============================================================================

/// Tests that the overlay wins at machine start when the context selects it.
#[test]
fn test_scenario_overlay_applies_at_start() {
    let machine = compile(delivery_config(Some("holiday")), BehaviorRegistry::new())
        .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("holiday.start"));
}

/// Tests that overlay transitions reroute to overlay targets.
#[test]
fn test_scenario_overlay_transition_targets() {
    let machine = compile(delivery_config(Some("holiday")), BehaviorRegistry::new())
        .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "GO", StepTime::Tick(2))
        .expect("overlay transition must fire");
    assert!(state.matches("holiday.queued"));
    assert!(!state.matches("dispatched"));
}

/// Tests that machines without the scenario key use the base states.
#[test]
fn test_without_scenario_key_base_states_apply() {
    let machine =
        compile(delivery_config(None), BehaviorRegistry::new()).expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("start"));
    let state = interpreter
        .transition(&state, "GO", StepTime::Tick(2))
        .expect("base transition must fire");
    assert!(state.matches("dispatched"));
}

/// Tests that unknown scenario names fall back to the base states.
#[test]
fn test_unknown_scenario_name_falls_back() {
    let machine = compile(delivery_config(Some("black_friday")), BehaviorRegistry::new())
        .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("start"));
}
