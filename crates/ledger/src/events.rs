use crate::{Hash32, LedgerError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Set,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteEvent {
    pub seq: u64,
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value_hash: Hash32,
    pub prev_event_hash: Hash32,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchWriteEvent {
    pub seq: u64,
    pub batch_hash: Hash32,
    pub keys: Vec<Vec<u8>>,
    pub prev_event_hash: Hash32,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    Single(WriteEvent),
    Batch(BatchWriteEvent),
}

impl Event {
    pub fn seq(&self) -> u64 {
        match self {
            Event::Single(e) => e.seq,
            Event::Batch(e) => e.seq,
        }
    }

    pub fn prev_event_hash(&self) -> Hash32 {
        match self {
            Event::Single(e) => e.prev_event_hash,
            Event::Batch(e) => e.prev_event_hash,
        }
    }

    pub fn touches(&self, key: &[u8]) -> bool {
        match self {
            Event::Single(e) => e.key == key,
            Event::Batch(e) => e.keys.iter().any(|k| k == key),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        bincode::serialize(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn hash(&self) -> Result<Hash32, LedgerError> {
        Ok(blake3::hash(&self.encode()?).into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub event_hash: Hash32,
    pub event: Event,
}

/// Walks entries in sequence order, checking hash links and hash correctness.
pub fn verify_chain(entries: &[LogEntry]) -> bool {
    let mut prev = [0u8; 32];

    for (i, e) in entries.iter().enumerate() {
        if e.event.seq() != i as u64 + 1 {
            return false;
        }
        if e.event.prev_event_hash() != prev {
            return false;
        }
        match e.event.hash() {
            Ok(computed) if computed == e.event_hash => {}
            _ => return false,
        }
        prev = e.event_hash;
    }

    true
}
