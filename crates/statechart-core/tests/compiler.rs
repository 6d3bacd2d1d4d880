// crates/statechart-core/tests/compiler.rs
// ============================================================================
// Module: Definition Compiler Tests
// Description: Tests for config compilation and structural validation.
// ============================================================================
//! ## Overview
//! Validates arena construction, target resolution, and the fail-closed
//! structural checks of the definition compiler.

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

use serde_json::json;
use statechart_core::compile;
use statechart_core::BehaviorRegistry;
use statechart_core::CompileError;
use statechart_core::EventType;
use statechart_core::MachineConfig;
use statechart_core::StateKind;

/// Parses a machine config from a JSON value.
fn config(value: serde_json::Value) -> MachineConfig {
    serde_json::from_value(value).expect("config must parse")
}

/// Registry with the behavior names the fixtures reference.
fn registry() -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.action_fn("noop", |_scope| Ok(()));
    registry.guard_fn("pass", |_scope| Ok(true));
    registry.calculator_fn("identity", |_scope| Ok(()));
    registry
}

// ============================================================================
// SECTION: Arena Construction
// ============================================================================

/// Tests id derivation, routes, and kinds for a nested machine.
#[test]
fn test_compile_builds_arena_with_qualified_ids() {
    let machine = compile(
        config(json!({
            "id": "order",
            "initial": "online",
            "states": {
                "online": {
                    "initial": "idle",
                    "states": {
                        "idle": {},
                        "working": {}
                    },
                    "on": { "DISCONNECT": "offline" }
                },
                "offline": {}
            }
        })),
        registry(),
    )
    .expect("machine must compile");

    assert_eq!(machine.id.as_str(), "order");
    assert_eq!(machine.delimiter, ".");
    let idle = machine.resolve_id("order.online.idle").expect("idle must exist");
    let definition = machine.state(idle);
    assert_eq!(definition.route, "online.idle");
    assert_eq!(definition.key, "idle");
    assert!(matches!(definition.kind, StateKind::Atomic));

    let online = machine.resolve_id("order.online").expect("online must exist");
    assert!(matches!(machine.state(online).kind, StateKind::Compound));
    assert_eq!(machine.state(online).children.len(), 2);
    assert!(machine.is_ancestor(online, idle));
}

/// Tests that the flat event set excludes internal event types.
#[test]
fn test_event_names_exclude_internal_types() {
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": {
                    "always": "b",
                    "on": { "GO": "b" }
                },
                "b": { "on": { "BACK": "a" } }
            }
        })),
        registry(),
    )
    .expect("machine must compile");

    let events = machine.event_names();
    assert!(events.contains(&EventType::new("GO")));
    assert!(events.contains(&EventType::new("BACK")));
    assert_eq!(events.len(), 2);
}

/// Tests nearest-ancestor target resolution across siblings.
#[test]
fn test_target_resolution_prefers_nearest_scope() {
    let machine = compile(
        config(json!({
            "initial": "outer",
            "states": {
                "outer": {
                    "initial": "inner",
                    "states": {
                        "inner": { "on": { "STEP": "sibling" } },
                        "sibling": {}
                    }
                },
                "sibling": {}
            }
        })),
        registry(),
    )
    .expect("machine must compile");

    let inner = machine.resolve_id("machine.outer.inner").expect("inner must exist");
    let transition = machine
        .state(inner)
        .transition_for(&EventType::new("STEP"))
        .expect("transition must exist");
    let target = transition.branches[0].target.expect("target must resolve");
    assert_eq!(machine.state(target).id.as_str(), "machine.outer.sibling");
}

/// Tests deterministic canonical hashing of configurations.
#[test]
fn test_config_hash_is_deterministic() {
    let build = || {
        compile(
            config(json!({ "initial": "a", "states": { "a": {} } })),
            registry(),
        )
        .expect("machine must compile")
    };
    assert_eq!(build().config_hash, build().config_hash);
}

// ============================================================================
// SECTION: Structural Validation
// ============================================================================

/// Tests that final states reject transitions.
#[test]
fn test_final_state_with_transitions_fails() {
    let result = compile(
        config(json!({
            "initial": "done",
            "states": {
                "done": { "type": "final", "on": { "GO": "done" } }
            }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::InvalidFinalState { .. })));
}

/// Tests that parallel states reject an initial pointer.
#[test]
fn test_parallel_with_initial_fails() {
    let result = compile(
        config(json!({
            "initial": "p",
            "states": {
                "p": {
                    "type": "parallel",
                    "initial": "r1",
                    "states": {
                        "r1": { "initial": "a", "states": { "a": {} } }
                    }
                }
            }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::InitialOnParallel { .. })));
}

/// Tests that parallel regions must be compound.
#[test]
fn test_parallel_with_atomic_region_fails() {
    let result = compile(
        config(json!({
            "initial": "p",
            "states": {
                "p": {
                    "type": "parallel",
                    "states": { "r1": {} }
                }
            }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::RegionNotCompound { .. })));
}

/// Tests that compound states require a resolvable initial child.
#[test]
fn test_unknown_initial_fails() {
    let result = compile(
        config(json!({
            "initial": "missing",
            "states": { "a": {} }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::UnknownInitial { .. })));
}

/// Tests that unresolvable transition targets fail compilation.
#[test]
fn test_unresolvable_target_fails() {
    let result = compile(
        config(json!({
            "initial": "a",
            "states": { "a": { "on": { "GO": "nowhere" } } }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::NoStateDefinitionFound { .. })));
}

/// Tests that explicitly atomic states reject children.
#[test]
fn test_atomic_with_children_fails() {
    let result = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "type": "atomic", "states": { "b": {} } }
            }
        })),
        registry(),
    );
    assert!(matches!(result, Err(CompileError::AtomicWithChildren { .. })));
}

/// Tests that unregistered behavior names fail compilation.
#[test]
fn test_unregistered_behavior_fails() {
    let result = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "on": { "GO": { "target": "a", "guards": ["unknownGuard"] } } }
            }
        })),
        registry(),
    );
    assert!(matches!(
        result,
        Err(CompileError::BehaviorNotRegistered { kind: "guard", .. })
    ));
}

/// Tests that explicit id overrides land in the id map.
#[test]
fn test_explicit_id_override() {
    let machine = compile(
        config(json!({
            "initial": "a",
            "states": {
                "a": { "id": "custom.alpha" },
                "b": { "on": { "JUMP": "custom.alpha" } }
            }
        })),
        registry(),
    )
    .expect("machine must compile");

    let alpha = machine.resolve_id("custom.alpha").expect("override id must resolve");
    assert_eq!(machine.state(alpha).key, "a");
}
