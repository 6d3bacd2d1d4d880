// crates/statechart-config/src/lib.rs
// ============================================================================
// Module: Statechart Config Library
// Description: Canonical machine-config loading from documents and files.
// Purpose: Single source of truth for config document semantics.
// Dependencies: statechart-core, serde, serde_json, serde_yaml, toml
// ============================================================================

//! ## Overview
//! `statechart-config` loads declarative machine configurations from JSON,
//! YAML, and TOML documents into the [`statechart_core::MachineConfig`]
//! consumed by the definition compiler. Parsing is strict and fail-closed:
//! unknown fields, oversized files, and unrecognized extensions are errors.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod examples;
pub mod loader;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use examples::example_machine_config;
pub use examples::CONFIG_JSON_EXAMPLE;
pub use loader::load_machine_config;
pub use loader::parse_machine_config;
pub use loader::ConfigError;
pub use loader::ConfigFormat;
pub use loader::MAX_CONFIG_FILE_SIZE;
