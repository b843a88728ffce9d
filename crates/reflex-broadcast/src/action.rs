//! Wire-level action records and the shared-action filter

use indexmap::IndexSet;
use reflex_core::{ProducerMap, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player:{}", self.0)
    }
}

/// One dispatch call: the action name and the exact arguments it received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastAction {
    pub name: String,
    pub arguments: Vec<Value>,
}

impl BroadcastAction {
    pub fn new(name: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

impl fmt::Display for BroadcastAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// The shared part of a producer tree
///
/// Built from the producers whose state is replicated: `slices` are their
/// names (the keys of the combined state) and `actions` is the union of their
/// dispatcher names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionFilter {
    slices: IndexSet<String>,
    actions: IndexSet<String>,
}

impl ActionFilter {
    /// Collect slice and action names from `producers`
    pub fn from_producers(producers: &ProducerMap) -> Self {
        let mut filter = Self::default();
        for (key, producer) in producers {
            filter.slices.insert(key.clone());
            filter.actions.extend(producer.get_dispatchers().into_keys());
        }
        filter
    }

    /// Whether dispatches of `action` are shared
    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }

    pub fn slices(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(String::as_str)
    }

    /// Whether `key` names a shared slice
    pub fn is_shared_slice(&self, key: &str) -> bool {
        self.slices.contains(key)
    }

    /// The shared slices of a combined `state`, as a map
    pub fn shared_state(&self, state: &Value) -> Value {
        Value::map(
            self.slices
                .iter()
                .map(|key| (key.clone(), state.get(key).clone())),
        )
    }
}
