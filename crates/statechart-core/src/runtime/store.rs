// crates/statechart-core/src/runtime/store.rs
// ============================================================================
// Module: Statechart In-Memory History Store
// Description: Simple in-memory record store for tests and examples.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of [`HistoryStore`]
//! for tests and local demos. It is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::identifiers::RootEventId;
use crate::core::record::InternalEventRecord;
use crate::interfaces::HistoryStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory history store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHistoryStore {
    /// Record lists keyed by root event id, protected by a mutex.
    runs: Arc<Mutex<BTreeMap<String, Vec<InternalEventRecord>>>>,
}

impl InMemoryHistoryStore {
    /// Creates a new in-memory history store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Returns the number of stored runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn run_count(&self) -> Result<usize, StoreError> {
        let guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("history store mutex poisoned".to_string()))?;
        Ok(guard.len())
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(
        &self,
        root_event_id: &RootEventId,
        records: &[InternalEventRecord],
    ) -> Result<(), StoreError> {
        let mut guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("history store mutex poisoned".to_string()))?;
        guard
            .entry(root_event_id.as_str().to_string())
            .or_default()
            .extend(records.iter().cloned());
        Ok(())
    }

    fn load(&self, root_event_id: &RootEventId) -> Result<Vec<InternalEventRecord>, StoreError> {
        let guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("history store mutex poisoned".to_string()))?;
        guard
            .get(root_event_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(root_event_id.as_str().to_string()))
    }
}
