//! Binary encoding for broadcast payloads
//!
//! The broadcaster and receiver only exchange values in memory; these helpers
//! let any byte transport carry them between processes.

use crate::{BroadcastAction, Error, PlayerId, Result};
use reflex_core::Value;
use serde::{Deserialize, Serialize};

/// Messages of the sync protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Client to server: send me the shared state
    StateRequest {
        /// The requesting peer
        player: PlayerId,
    },
    /// Server to client: response to a state request
    State(Value),
    /// Server to clients: actions dispatched during one tick, in order
    Actions(Vec<BroadcastAction>),
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}

pub fn encode_actions(actions: &[BroadcastAction]) -> Result<Vec<u8>> {
    serialize(actions)
}

pub fn decode_actions(bytes: &[u8]) -> Result<Vec<BroadcastAction>> {
    deserialize(bytes)
}

pub fn encode_state(state: &Value) -> Result<Vec<u8>> {
    serialize(state)
}

pub fn decode_state(bytes: &[u8]) -> Result<Value> {
    deserialize(bytes)
}

fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
}
