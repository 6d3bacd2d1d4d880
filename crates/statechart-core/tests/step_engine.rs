// crates/statechart-core/tests/step_engine.rs
// ============================================================================
// Module: Step Engine Tests
// Description: Tests for single RTC steps, arbitration, and bubbling.
// ============================================================================
//! ## Overview
//! Validates guarded calculator sequences, event bubbling, self-transition
//! idempotence, and the no-transition error path.

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
use statechart_core::BehaviorError;
use statechart_core::BehaviorRegistry;
use statechart_core::InMemoryHistoryStore;
use statechart_core::Interpreter;
use statechart_core::MachineConfig;
use statechart_core::RecordTag;
use statechart_core::RootEventId;
use statechart_core::State;
use statechart_core::StepError;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

/// Registry for the order fixture: multiply-then-guard-then-mark.
fn order_registry() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.calculator_fn("mul10", |scope| {
        let count = scope
            .context
            .get("items_count")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| BehaviorError::failed("items_count must be an integer"))?;
        scope.context.set("items_count", json!(count * 10));
        Ok(())
    });
    registry.guard_fn("positive", |scope| {
        Ok(scope
            .context
            .get("items_count")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|count| count > 0))
    });
    registry.action_fn("mark_created", |scope| {
        scope.context.set("order_created", json!(true));
        Ok(())
    });
    registry
}

/// Order machine: idle reacts to CREATE_ORDER through a guarded branch.
fn order_machine(items_count: i64) -> Interpreter<InMemoryHistoryStore> {
    let machine = compile(
        config(json!({
            "id": "order",
            "context": { "items_count": items_count },
            "initial": "idle",
            "states": {
                "idle": {
                    "on": {
                        "CREATE_ORDER": {
                            "calculators": ["mul10"],
                            "guards": ["positive"],
                            "actions": ["mark_created"],
                            "target": "processing"
                        }
                    }
                },
                "processing": {}
            }
        })),
        order_registry(),
    )
    .expect("machine must compile");
    Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new())
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

/// Collects the record tags of a state in order.
fn tags(state: &State) -> Vec<RecordTag> {
    state.records.iter().map(|record| record.tag).collect()
}

// ============================================================================
// SECTION: Guarded Calculator Sequence
// ============================================================================

/// Tests the passing branch: calculator result feeds the guard.
#[test]
fn test_guarded_branch_passes_after_calculator() {
    let interpreter = order_machine(5);
    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "CREATE_ORDER", StepTime::Tick(2))
        .expect("step must succeed");

    assert!(state.matches("processing"));
    assert_eq!(state.context.get("items_count"), Some(&json!(50)));
    assert_eq!(state.context.get("order_created"), Some(&json!(true)));
}

/// Tests the failing branch: no state change, no action side effects.
#[test]
fn test_guarded_branch_fails_silently() {
    let interpreter = order_machine(0);
    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "CREATE_ORDER", StepTime::Tick(2))
        .expect("failed guard must not abort the step");

    assert!(state.matches("idle"));
    assert_eq!(state.context.get("items_count"), Some(&json!(0)));
    assert_eq!(state.context.get("order_created"), None);
    assert!(tags(&state).contains(&RecordTag::TransitionFail));
    assert!(!tags(&state).contains(&RecordTag::StateExit));
}

/// Tests the record ordering of one full transition.
#[test]
fn test_transition_record_ordering() {
    let interpreter = order_machine(5);
    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "CREATE_ORDER", StepTime::Tick(2))
        .expect("step must succeed");

    let step_tags: Vec<RecordTag> = state
        .records
        .iter()
        .filter(|record| record.created_at == StepTime::Tick(2))
        .map(|record| record.tag)
        .collect();
    assert_eq!(
        step_tags,
        vec![
            RecordTag::TransitionStart,
            RecordTag::CalculatorStart,
            RecordTag::CalculatorFinish,
            RecordTag::GuardStart,
            RecordTag::GuardPass,
            RecordTag::ActionStart,
            RecordTag::ActionFinish,
            RecordTag::TransitionFinish,
            RecordTag::StateExit,
            RecordTag::StateEnter,
        ]
    );
}

// ============================================================================
// SECTION: Bubbling
// ============================================================================

/// Tests that events bubble to the nearest ancestor handler.
#[test]
fn test_event_bubbles_to_ancestor() {
    let machine = compile(
        config(json!({
            "id": "net",
            "initial": "online",
            "states": {
                "online": {
                    "initial": "idle",
                    "states": { "idle": {}, "working": {} },
                    "on": { "DISCONNECT": "offline" }
                },
                "offline": {}
            }
        })),
        BehaviorRegistry::new(),
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());
    let state = start(&interpreter);
    assert!(state.matches("online.idle"));

    let state = interpreter
        .transition(&state, "DISCONNECT", StepTime::Tick(2))
        .expect("bubbled transition must fire");
    assert!(state.matches("offline"));

    let exits: Vec<String> = state
        .records
        .iter()
        .filter(|record| record.tag == RecordTag::StateExit)
        .filter_map(|record| record.subject.clone())
        .collect();
    assert_eq!(exits, vec!["online.idle".to_string(), "online".to_string()]);
}

// ============================================================================
// SECTION: Self-Transitions
// ============================================================================

/// Tests that a target-less branch changes nothing but runs its actions.
#[test]
fn test_self_transition_is_idempotent() {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("tick", |scope| {
        let ticks = scope
            .context
            .get("ticks")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        scope.context.set("ticks", json!(ticks + 1));
        Ok(())
    });
    let machine = compile(
        config(json!({
            "context": { "ticks": 0 },
            "initial": "a",
            "states": {
                "a": { "on": { "PING": { "actions": ["tick"] } } }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let before = state.value.clone();
    let state = interpreter
        .transition(&state, "PING", StepTime::Tick(2))
        .expect("self-transition must succeed");

    assert_eq!(state.value, before);
    assert_eq!(state.context.get("ticks"), Some(&json!(1)));
    let step_tags: Vec<RecordTag> = state
        .records
        .iter()
        .filter(|record| record.created_at == StepTime::Tick(2))
        .map(|record| record.tag)
        .collect();
    assert!(!step_tags.contains(&RecordTag::StateExit));
    assert!(!step_tags.contains(&RecordTag::StateEnter));
}

// ============================================================================
// SECTION: Error Paths
// ============================================================================

/// Tests that an unhandled event aborts the step with no state change.
#[test]
fn test_unhandled_event_fails() {
    let interpreter = order_machine(5);
    let state = start(&interpreter);
    let failure = interpreter
        .transition(&state, "UNKNOWN_EVENT", StepTime::Tick(2))
        .expect_err("unhandled event must fail");
    assert!(matches!(failure.error, StepError::NoTransitionForEvent { .. }));
    assert!(state.matches("idle"));
}

/// Tests that behaviors declaring required context keys fail closed.
#[test]
fn test_required_context_key_missing_fails() {
    /// Action unit declaring a required context key.
    struct NeedsUser;
    impl statechart_core::ActionUnit for NeedsUser {
        fn behavior_type(&self) -> &str {
            "needsUser"
        }
        fn required_context(&self) -> &[&str] {
            &["user"]
        }
        fn invoke(
            &self,
            _scope: &mut statechart_core::ActionScope<'_>,
        ) -> Result<(), BehaviorError> {
            Ok(())
        }
    }

    let mut registry = BehaviorRegistry::new();
    registry.action_unit(Arc::new(NeedsUser));
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "actions": ["needsUser"] } } }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let failure = interpreter
        .transition(&state, "GO", StepTime::Tick(2))
        .expect_err("missing required key must fail");
    assert!(matches!(failure.error, StepError::Context(_)));
}

/// Tests that behavior spec arguments reach the invocation scope.
#[test]
fn test_behavior_spec_arguments_are_injected() {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("setKey", |scope| {
        let key = scope
            .args
            .first()
            .ok_or_else(|| BehaviorError::failed("setKey requires a key argument"))?;
        let value = scope
            .args
            .get(1)
            .ok_or_else(|| BehaviorError::failed("setKey requires a value argument"))?;
        scope.context.set(key.clone(), json!(value));
        Ok(())
    });
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "actions": ["setKey:stage,ready"] } } }
            }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = start(&interpreter);
    let state = interpreter
        .transition(&state, "GO", StepTime::Tick(2))
        .expect("step must succeed");
    assert_eq!(state.context.get("stage"), Some(&json!("ready")));
}
