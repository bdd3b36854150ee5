//! Core types for the ledger

use serde::{Deserialize, Serialize};

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Receipt for a single write or delete
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub seq: u64,
    pub key: Vec<u8>,
    pub value_hash: Hash32,
    pub event_hash: Hash32,
}

/// Receipt for an atomic batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub seq: u64,
    pub batch_hash: Hash32,
    pub event_hash: Hash32,
    pub op_count: u32,
}

/// Result of a read, tied to the chain head it was observed at
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadResult {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub value_hash: Hash32,
    pub checkpoint: Checkpoint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seq: u64,
    pub latest_event_hash: Hash32,
}
