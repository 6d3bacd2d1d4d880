// crates/statechart-core/examples/minimal.rs
// ============================================================================
// Module: Statechart Minimal Example
// Description: Minimal end-to-end run using the in-memory history store.
// Purpose: Demonstrate compile, initial_state, transition, and restore.
// Dependencies: statechart-core, serde_json
// ============================================================================

//! ## Overview
//! Compiles a small order machine, drives it through one guarded transition,
//! and restores the run from the persisted record log. This example is
//! backend-agnostic and suitable for quick verification.

use std::sync::Arc;

use serde_json::json;
use statechart_core::compile;
use statechart_core::BehaviorError;
use statechart_core::BehaviorRegistry;
use statechart_core::InMemoryHistoryStore;
use statechart_core::Interpreter;
use statechart_core::MachineConfig;
use statechart_core::RootEventId;
use statechart_core::StepInit;
use statechart_core::StepTime;

/// Runs the minimal machine end to end.
#[allow(
    clippy::print_stdout,
    clippy::use_debug,
    reason = "Example output is printed for quick verification."
)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config: MachineConfig = serde_json::from_value(json!({
        "id": "order",
        "context": { "items_count": 3 },
        "initial": "idle",
        "states": {
            "idle": {
                "on": {
                    "CREATE_ORDER": {
                        "calculators": ["recalculate"],
                        "guards": ["hasItems"],
                        "actions": ["markCreated"],
                        "target": "processing"
                    }
                }
            },
            "processing": { "on": { "FULFILL": "fulfilled" } },
            "fulfilled": { "type": "final" }
        }
    }))?;

    let mut registry = BehaviorRegistry::new();
    registry.calculator_fn("recalculate", |scope| {
        let count = scope
            .context
            .get("items_count")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| BehaviorError::failed("items_count must be an integer"))?;
        scope.context.set("items_total", json!(count * 10));
        Ok(())
    });
    registry.guard_fn("hasItems", |scope| {
        Ok(scope
            .context
            .get("items_count")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|count| count > 0))
    });
    registry.action_fn("markCreated", |scope| {
        scope.context.set("order_created", json!(true));
        Ok(())
    });

    let machine = Arc::new(compile(config, registry)?);
    let store = InMemoryHistoryStore::new();
    let interpreter = Interpreter::new(Arc::clone(&machine), store);
    let root = RootEventId::new("example-run");

    let state = interpreter.initial_state(StepInit {
        root_event_id: root.clone(),
        time: StepTime::Tick(1),
        event: None,
    })?;
    let state = interpreter.transition(&state, "CREATE_ORDER", StepTime::Tick(2))?;
    println!("active: {:?}", state.routes());
    println!("context: {}", json!(state.context.values()));

    let restored = interpreter.restore(&root)?;
    println!("restored active: {:?}", restored.routes());
    println!("records persisted: {}", state.records.len());
    Ok(())
}
