// crates/statechart-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example machine configuration payloads.
// Purpose: Deterministic examples for docs and tooling.
// Dependencies: statechart-core, serde_json
// ============================================================================

//! ## Overview
//! Canonical examples for machine configuration documents. Outputs are
//! deterministic and kept in sync with the core config shape; the example
//! parses into a [`statechart_core::MachineConfig`] as-is.

// ============================================================================
// SECTION: Imports
// ============================================================================

use statechart_core::MachineConfig;

use crate::loader::parse_machine_config;
use crate::loader::ConfigError;
use crate::loader::ConfigFormat;

// ============================================================================
// SECTION: Canonical Example
// ============================================================================

/// Canonical example machine configuration in JSON.
pub const CONFIG_JSON_EXAMPLE: &str = r#"{
  "id": "order",
  "version": "1.0.0",
  "context": { "items_count": 0 },
  "initial": "idle",
  "states": {
    "idle": {
      "on": {
        "CREATE_ORDER": {
          "calculators": ["recalculateTotals"],
          "guards": ["hasItems"],
          "actions": ["markCreated"],
          "target": "processing"
        }
      }
    },
    "processing": {
      "type": "parallel",
      "onDone": "fulfilled",
      "states": {
        "payment": {
          "initial": "pending",
          "states": {
            "pending": { "on": { "PAYMENT_SUCCESS": "paid" } },
            "paid": { "type": "final" }
          }
        },
        "shipping": {
          "initial": "picking",
          "states": {
            "picking": { "on": { "PICKED": "packing" } },
            "packing": { "on": { "PACKED": "shipped" } },
            "shipped": { "type": "final" }
          }
        }
      }
    },
    "fulfilled": { "type": "final" }
  }
}
"#;

/// Returns the parsed canonical example machine configuration.
///
/// # Errors
///
/// Returns [`ConfigError`] when the embedded example drifts out of sync with
/// the core config shape.
pub fn example_machine_config() -> Result<MachineConfig, ConfigError> {
    parse_machine_config(CONFIG_JSON_EXAMPLE, ConfigFormat::Json)
}
