// crates/statechart-core/src/core/mod.rs
// ============================================================================
// Module: Statechart Core Types
// Description: Canonical configuration, definition, and run-state structures.
// Purpose: Provide stable types for machine definitions and record logs.
// Dependencies: indexmap, serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Core types define the declarative machine configuration, the compiled
//! definition arena, the behavior registry, the context store, events, and
//! the internal event record log. These types are the canonical source of
//! truth for any derived surfaces (config loaders, persistence adapters).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod compiler;
pub mod config;
pub mod context;
pub mod definition;
pub mod event;
pub mod hashing;
pub mod identifiers;
pub mod record;
pub mod registry;
pub mod state;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use compiler::compile;
pub use compiler::CompileError;
pub use config::BehaviorSpecList;
pub use config::MachineConfig;
pub use config::ScenarioConfig;
pub use config::StateNodeConfig;
pub use config::StateTypeConfig;
pub use config::TransitionBranchConfig;
pub use config::TransitionValueConfig;
pub use config::DEFAULT_DELIMITER;
pub use config::DEFAULT_MACHINE_ID;
pub use context::context_delta;
pub use context::Context;
pub use context::ContextError;
pub use context::ContextSchema;
pub use context::FieldRule;
pub use context::ValueKind;
pub use definition::BehaviorSpec;
pub use definition::MachineDefinition;
pub use definition::StateDefinition;
pub use definition::StateHandle;
pub use definition::StateKind;
pub use definition::TransitionBranch;
pub use definition::TransitionDefinition;
pub use event::completion_event;
pub use event::Event;
pub use event::EventDefinition;
pub use event::EventInput;
pub use event::PayloadRule;
pub use event::ValidationError;
pub use event::ALWAYS_EVENT;
pub use event::DONE_EVENT_PREFIX;
pub use event::INIT_EVENT;
pub use hashing::hash_machine_config;
pub use hashing::DefinitionDigest;
pub use hashing::HashError;
pub use identifiers::EventType;
pub use identifiers::MachineId;
pub use identifiers::RootEventId;
pub use identifiers::ScenarioName;
pub use identifiers::StateId;
pub use record::InternalEventRecord;
pub use record::RecordTag;
pub use record::StepTime;
pub use registry::ActionBehavior;
pub use registry::ActionScope;
pub use registry::ActionUnit;
pub use registry::BehaviorError;
pub use registry::BehaviorKind;
pub use registry::BehaviorRegistry;
pub use registry::CalculatorBehavior;
pub use registry::CalculatorScope;
pub use registry::CalculatorUnit;
pub use registry::GuardBehavior;
pub use registry::GuardScope;
pub use registry::GuardUnit;
pub use registry::RaiseSink;
pub use registry::ResultBehavior;
pub use registry::ResultScope;
pub use registry::ResultUnit;
pub use state::RunStatus;
pub use state::State;
