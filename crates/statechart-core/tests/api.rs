// crates/statechart-core/tests/api.rs
// ============================================================================
// Module: Public API Tests
// Description: Tests for state introspection, results, and registry lookup.
// ============================================================================
//! ## Overview
//! Validates the host-facing API: current value and path matching, result
//! extraction, behavior spec parsing, and fail-closed registry resolution.

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
use statechart_core::BehaviorKind;
use statechart_core::BehaviorRegistry;
use statechart_core::BehaviorSpec;
use statechart_core::InMemoryHistoryStore;
use statechart_core::Interpreter;
use statechart_core::MachineConfig;
use statechart_core::RootEventId;
use statechart_core::StateId;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

// ============================================================================
// SECTION: Behavior Specs
// ============================================================================

/// Tests `name:arg1,arg2` spec parsing.
#[test]
fn test_behavior_spec_parsing() {
    let spec = BehaviorSpec::parse("discount:10,percent");
    assert_eq!(spec.name, "discount");
    assert_eq!(spec.args, vec!["10".to_string(), "percent".to_string()]);

    let bare = BehaviorSpec::parse("discount");
    assert_eq!(bare.name, "discount");
    assert!(bare.args.is_empty());

    assert_eq!(spec.to_string(), "discount:10,percent");
    assert_eq!(bare.to_string(), "discount");
}

/// Tests fail-closed registry resolution.
#[test]
fn test_registry_resolution_fails_closed() {
    let registry = BehaviorRegistry::new();
    let error = registry.resolve_guard("missing").expect_err("lookup must fail");
    assert!(matches!(
        error,
        BehaviorError::NotFound {
            kind: BehaviorKind::Guard,
            ..
        }
    ));
}

// ============================================================================
// SECTION: State Introspection
// ============================================================================

/// Tests current_value and prefix-based path matching.
#[test]
fn test_current_value_and_matches() {
    let machine = compile(
        config(json!({
            "id": "net",
            "initial": "online",
            "states": {
                "online": {
                    "initial": "idle",
                    "states": { "idle": {}, "working": {} }
                },
                "offline": {}
            }
        })),
        BehaviorRegistry::new(),
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize");

    let value = state.current_value();
    assert!(value.contains(&StateId::new("net.online.idle")));
    assert_eq!(value.len(), 1);

    assert!(state.matches("online"));
    assert!(state.matches("online.idle"));
    assert!(!state.matches("offline"));
    assert!(!state.matches("online.working"));
}

/// Tests that state meta surfaces unchanged on enter records.
#[test]
fn test_meta_surfaces_on_enter_records() {
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "meta": { "owner": "fulfillment" } }
            }
        })),
        BehaviorRegistry::new(),
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize");

    let enter = state
        .records
        .iter()
        .find(|record| record.tag == statechart_core::RecordTag::StateEnter)
        .expect("STATE_ENTER must be recorded");
    assert_eq!(enter.meta, Some(json!({ "owner": "fulfillment" })));
}

// ============================================================================
// SECTION: Result Extraction
// ============================================================================

/// Tests the configured result extractor.
#[test]
fn test_result_extractor() {
    let mut registry = BehaviorRegistry::new();
    registry.result_fn("summarize", |scope| {
        let count = scope.context.get("count").cloned().unwrap_or(json!(null));
        Ok(json!({ "count": count, "active": scope.active.len() }))
    });
    let machine = compile(
        config(json!({
            "context": { "count": 7 },
            "initial": "a",
            "result": "summarize",
            "states": { "a": {} }
        })),
        registry,
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize");

    let result = interpreter.result(&state).expect("result must extract");
    assert_eq!(result, Some(json!({ "count": 7, "active": 1 })));
}

/// Tests that machines without a result extractor return None.
#[test]
fn test_result_absent_when_unconfigured() {
    let machine = compile(
        config(json!({ "initial": "a", "states": { "a": {} } })),
        BehaviorRegistry::new(),
    )
    .expect("machine must compile");
    let interpreter = Interpreter::new(Arc::new(machine), InMemoryHistoryStore::new());

    let state = interpreter
        .initial_state(StepInit {
            root_event_id: RootEventId::new("run-1"),
            time: StepTime::Tick(1),
            event: None,
        })
        .expect("initial state must materialize");
    assert_eq!(interpreter.result(&state).expect("result must succeed"), None);
}
