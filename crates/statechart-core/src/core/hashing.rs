// crates/statechart-core/src/core/hashing.rs
// ============================================================================
// Module: Statechart Definition Digest
// Description: Canonical digest of a machine configuration.
// Purpose: Detect definition drift between a persisted run and its machine.
// Dependencies: crate::core::config, serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! The compiler digests the canonical JSON form (RFC 8785) of a machine
//! configuration. The digest is stamped into the first record of every run
//! and compared during restoration, so a persisted run can never silently be
//! replayed against a drifted definition. Nothing else is hashed; the digest
//! surface is deliberately this narrow.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::config::MachineConfig;

// ============================================================================
// SECTION: Definition Digest
// ============================================================================

/// SHA-256 digest of a machine configuration's canonical JSON form.
///
/// # Invariants
/// - Serializes as its lowercase hex string; equal digests mean equal
///   canonical configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionDigest(String);

impl DefinitionDigest {
    /// Returns the digest as a lowercase hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefinitionDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when digesting a machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize machine config: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Digest Computation
// ============================================================================

/// Digests a machine configuration over its RFC 8785 canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_machine_config(config: &MachineConfig) -> Result<DefinitionDigest, HashError> {
    let canonical =
        serde_jcs::to_vec(config).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hasher.finalize();

    let mut value = String::with_capacity(digest.len() * 2);
    for byte in digest {
        value.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
        value.push(char::from_digit(u32::from(byte & 0x0f), 16).unwrap_or('0'));
    }
    Ok(DefinitionDigest(value))
}
