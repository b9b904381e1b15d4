use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::identifier::Identifier;

/// Where an identifier is in the load pipeline. Absence means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Registered, fetch pending
    Queried,
    /// Raw data queued for handler construction
    Loaded,
    /// Handler construction started
    Processed,
}

/// Per-identifier processing states with compare-and-remove
#[derive(Debug, Default)]
pub struct StateTable {
    states: Mutex<HashMap<Identifier, ProcessingState>>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Identifier) -> Option<ProcessingState> {
        self.states.lock().get(id).copied()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.states.lock().contains_key(id)
    }

    pub fn set(&self, id: &Identifier, state: ProcessingState) {
        self.states.lock().insert(id.clone(), state);
    }

    /// Remove the state only if it currently equals `expected`
    pub fn lift_if(&self, id: &Identifier, expected: ProcessingState) -> bool {
        let mut states = self.states.lock();
        if states.get(id) == Some(&expected) {
            states.remove(id);
            true
        } else {
            false
        }
    }

    /// Remove whatever state is recorded
    pub fn clear(&self, id: &Identifier) {
        self.states.lock().remove(id);
    }

    /// Record `state` unless the identifier is already further along
    pub fn set_if_absent(&self, id: &Identifier, state: ProcessingState) -> bool {
        let mut states = self.states.lock();
        if states.contains_key(id) {
            return false;
        }
        states.insert(id.clone(), state);
        true
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<Identifier, ProcessingState> {
        self.states.lock().clone()
    }
}
