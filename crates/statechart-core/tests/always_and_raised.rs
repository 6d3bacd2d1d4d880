// crates/statechart-core/tests/always_and_raised.rs
// ============================================================================
// Module: Always-Transition and Raised-Event Tests
// Description: Tests for eventless chains and internally-raised events.
// ============================================================================
//! ## Overview
//! Validates always-transition chains, run-to-completion ordering of raised
//! events, and FIFO queue draining within one step.

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
use statechart_core::RecordTag;
use statechart_core::RootEventId;
use statechart_core::RunStatus;
use statechart_core::State;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

/// Starts a run with a logical timestamp.
fn start(interpreter: &Interpreter<InMemoryHistoryStore>) -> State {
    interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize")
}

/// Returns the record index of the first match, panicking when absent.
fn position(state: &State, predicate: impl Fn(&statechart_core::InternalEventRecord) -> bool) -> usize {
    state
        .records
        .iter()
        .position(predicate)
        .expect("expected record must be present")
}

// ============================================================================
// SECTION: Always Chains
// ============================================================================

/// Tests that an always-chain settles in the final state during start.
#[test]
fn test_always_chain_settles_at_initial_state() {
    let machine = compile(
        config(json!({
            "id": "chain",
            "initial": "a",
            "states": {
                "a": { "always": "b" },
                "b": { "always": "c" },
                "c": { "type": "final" }
            }
        })),
        BehaviorRegistry::new(),
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("c"));
    assert_eq!(state.status, RunStatus::Done);

    let tags: Vec<RecordTag> = state.records.iter().map(|record| record.tag).collect();
    assert_eq!(tags.first(), Some(&RecordTag::MachineStart));
    assert_eq!(tags.last(), Some(&RecordTag::MachineFinish));

    let enters: Vec<String> = state
        .records
        .iter()
        .filter(|record| record.tag == RecordTag::StateEnter)
        .filter_map(|record| record.subject.clone())
        .collect();
    assert_eq!(enters, vec!["a".to_string(), "b".to_string(), "c".to_string()]);

    let exits: Vec<String> = state
        .records
        .iter()
        .filter(|record| record.tag == RecordTag::StateExit)
        .filter_map(|record| record.subject.clone())
        .collect();
    assert_eq!(exits, vec!["a".to_string(), "b".to_string()]);
}

/// Tests that a guarded always-transition that fails does not loop forever.
#[test]
fn test_guarded_always_failure_quiesces() {
    let mut registry = BehaviorRegistry::new();
    registry.guard_fn("never", |_scope| Ok(false));
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "always": { "target": "b", "guards": ["never"] } },
                "b": {}
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("a"));
    assert!(state
        .records
        .iter()
        .any(|record| record.tag == RecordTag::TransitionFail));
}

// ============================================================================
// SECTION: Raised Events
// ============================================================================

/// Tests the ordering of entry actions, EVENT_RAISED, and the chained
/// transition when an entry action raises an event.
#[test]
fn test_raised_event_processed_after_entry_finishes() {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("announceLoading", |scope| {
        scope.context.set("log", json!("Loading started"));
        scope.raise("DONE");
        Ok(())
    });
    registry.action_fn("announceReady", |scope| {
        scope.context.set("log", json!("ready"));
        Ok(())
    });
    let machine = compile(
        config(json!({
            "id": "loader",
            "initial": "loading",
            "states": {
                "loading": {
                    "entry": "announceLoading",
                    "on": { "DONE": "ready" }
                },
                "ready": { "entry": "announceReady" }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    assert!(state.matches("ready"));
    assert_eq!(state.context.get("log"), Some(&json!("ready")));

    let entry_action = position(&state, |record| {
        record.tag == RecordTag::ActionFinish
            && record.subject.as_deref() == Some("announceLoading")
    });
    let entry_finish = position(&state, |record| {
        record.tag == RecordTag::StateEntryFinish
            && record.subject.as_deref() == Some("loading")
    });
    let raised = position(&state, |record| record.tag == RecordTag::EventRaised);
    let transition_start = position(&state, |record| {
        record.tag == RecordTag::TransitionStart
            && record.subject.as_deref() == Some("loading.DONE")
    });
    let ready_enter = position(&state, |record| {
        record.tag == RecordTag::StateEnter && record.subject.as_deref() == Some("ready")
    });

    assert!(entry_action < entry_finish);
    assert!(entry_finish < raised);
    assert!(raised < transition_start);
    assert!(transition_start < ready_enter);
}

/// Tests that raised events drain in FIFO order.
#[test]
fn test_raised_events_drain_fifo() {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("raiseBoth", |scope| {
        scope.raise("FIRST");
        scope.raise("SECOND");
        Ok(())
    });
    registry.action_fn("recordFirst", |scope| {
        scope.context.set("first_seen", json!(true));
        Ok(())
    });
    registry.action_fn("recordSecond", |scope| {
        let first = scope.context.contains_key("first_seen");
        scope.context.set("order_ok", json!(first));
        Ok(())
    });
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": {
                    "on": {
                        "KICK": { "actions": ["raiseBoth"] },
                        "FIRST": { "actions": ["recordFirst"] },
                        "SECOND": { "actions": ["recordSecond"] }
                    }
                }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "KICK", StepTime::Tick(2))
        .expect("step must succeed");
    assert_eq!(state.context.get("order_ok"), Some(&json!(true)));
}

/// Tests that a raised event with no handler is dropped, not fatal.
#[test]
fn test_unhandled_raised_event_is_dropped() {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("raiseUnknown", |scope| {
        scope.raise("NOBODY_LISTENS");
        Ok(())
    });
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "on": { "KICK": { "actions": ["raiseUnknown"] } } }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "KICK", StepTime::Tick(2))
        .expect("unhandled raised event must not abort the step");
    assert!(state.matches("a"));
    assert!(state
        .records
        .iter()
        .any(|record| record.tag == RecordTag::EventRaised));
}
