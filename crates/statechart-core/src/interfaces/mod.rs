// crates/statechart-core/src/interfaces/mod.rs
// ============================================================================
// Module: Statechart Interfaces
// Description: Backend-agnostic interfaces for record persistence.
// Purpose: Define the contract surface external collaborators implement.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the interpreter core integrates with external
//! persistence without embedding backend-specific details. The core appends
//! each step's internal event records through the history store; restoration
//! reads them back by root event id. Implementations must be deterministic
//! and fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::identifiers::RootEventId;
use crate::core::record::InternalEventRecord;

// ============================================================================
// SECTION: History Store
// ============================================================================

/// History store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store reported an error.
    #[error("history store error: {0}")]
    Store(String),
    /// No records exist for the requested root event id.
    #[error("no records found for root event id `{0}`")]
    RunNotFound(String),
}

/// Backend-agnostic persistence for internal event records.
///
/// The engine appends the records produced by each step after the step
/// completes; records within one run share a root event id and are stored in
/// sequence order.
pub trait HistoryStore {
    /// Appends a step's records to the run identified by the root event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the records cannot be persisted.
    fn append(
        &self,
        root_event_id: &RootEventId,
        records: &[InternalEventRecord],
    ) -> Result<(), StoreError>;

    /// Loads all records of a run in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RunNotFound`] when the run does not exist.
    fn load(&self, root_event_id: &RootEventId) -> Result<Vec<InternalEventRecord>, StoreError>;
}
