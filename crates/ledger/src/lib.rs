//! Hash-chained key/value ledger
//!
//! Every mutation is committed to the backing [`Storage`] in the same atomic
//! batch as an audit event that links to the previous event by its BLAKE3
//! hash. Readers therefore never observe a value without the event that
//! produced it, and the full write history can be re-verified offline.

mod crypto;
mod events;
mod storage;
mod types;

pub use events::{verify_chain, BatchWriteEvent, Event, LogEntry, Operation, WriteEvent};
pub use storage::{FileBackedStorage, InMemoryStorage, Storage, StorageError, WriteOp};
pub use types::{BatchReceipt, Checkpoint, Hash32, ReadResult, WriteReceipt};

use thiserror::Error;

const META_PREFIX: &[u8] = b"__ledger:";
const KEY_HEAD: &[u8] = b"__ledger:head";
const EVENT_PREFIX: &str = "__ledger:event:";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key is reserved for ledger metadata: {0}")]
    ReservedKey(String),

    #[error("Batch contains no operations")]
    EmptyBatch,
}

pub type Result<T> = std::result::Result<T, LedgerError>;

fn event_key(seq: u64) -> Vec<u8> {
    format!("{EVENT_PREFIX}{seq:020}").into_bytes()
}

fn now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.starts_with(META_PREFIX) {
        return Err(LedgerError::ReservedKey(String::from_utf8_lossy(key).into_owned()));
    }
    Ok(())
}

/// Hash-chained key/value store over any [`Storage`] backend.
pub struct Ledger<S: Storage> {
    storage: S,
    head: Checkpoint,
}

impl<S: Storage> Ledger<S> {
    /// Open a ledger, resuming the event chain persisted in `storage` if any.
    pub fn open(storage: S) -> Result<Self> {
        let head = match storage.get(KEY_HEAD)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?,
            None => Checkpoint::default(),
        };
        Ok(Self { storage, head })
    }

    /// Set a key-value pair
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<WriteReceipt> {
        check_key(key)?;
        let value_hash = crypto::hash_value(value);

        let event = Event::Single(WriteEvent {
            seq: self.head.seq + 1,
            operation: Operation::Set,
            key: key.to_vec(),
            value_hash,
            prev_event_hash: self.head.latest_event_hash,
            timestamp: now(),
        });

        let mut ops = vec![WriteOp::Put(key.to_vec(), value.to_vec())];
        let (event_hash, next) = self.chain(event, &mut ops)?;
        self.storage.write_batch(&ops)?;
        self.head = next;

        Ok(WriteReceipt {
            seq: next.seq,
            key: key.to_vec(),
            value_hash,
            event_hash,
        })
    }

    /// Delete a key
    pub fn delete(&mut self, key: &[u8]) -> Result<WriteReceipt> {
        check_key(key)?;
        let value_hash = crypto::empty_value_hash();

        let event = Event::Single(WriteEvent {
            seq: self.head.seq + 1,
            operation: Operation::Delete,
            key: key.to_vec(),
            value_hash,
            prev_event_hash: self.head.latest_event_hash,
            timestamp: now(),
        });

        let mut ops = vec![WriteOp::Delete(key.to_vec())];
        let (event_hash, next) = self.chain(event, &mut ops)?;
        self.storage.write_batch(&ops)?;
        self.head = next;

        Ok(WriteReceipt {
            seq: next.seq,
            key: key.to_vec(),
            value_hash,
            event_hash,
        })
    }

    /// Apply puts and deletes as one atomic unit with a single audit event.
    pub fn write_batch(&mut self, batch: Vec<WriteOp>) -> Result<BatchReceipt> {
        if batch.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }

        let mut commitment = blake3::Hasher::new();
        commitment.update(b"batch");
        for op in &batch {
            check_key(op.key())?;
            let op_hash = match op {
                WriteOp::Put(k, v) => crypto::hash_op(false, k, crypto::hash_value(v)),
                WriteOp::Delete(k) => crypto::hash_op(true, k, crypto::empty_value_hash()),
            };
            commitment.update(&op_hash);
        }
        let batch_hash: Hash32 = commitment.finalize().into();
        let op_count = batch.len() as u32;

        let event = Event::Batch(BatchWriteEvent {
            seq: self.head.seq + 1,
            batch_hash,
            keys: batch.iter().map(|op| op.key().to_vec()).collect(),
            prev_event_hash: self.head.latest_event_hash,
            timestamp: now(),
        });

        let mut ops = batch;
        let (event_hash, next) = self.chain(event, &mut ops)?;
        self.storage.write_batch(&ops)?;
        self.head = next;

        Ok(BatchReceipt {
            seq: next.seq,
            batch_hash,
            event_hash,
            op_count,
        })
    }

    /// Convenience wrapper for a put-only batch
    pub fn batch_set(&mut self, pairs: &[(&[u8], &[u8])]) -> Result<BatchReceipt> {
        let ops = pairs
            .iter()
            .map(|(k, v)| WriteOp::Put(k.to_vec(), v.to_vec()))
            .collect();
        self.write_batch(ops)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.storage.get(key)?)
    }

    /// Get a value together with its hash and the chain head it was read at
    pub fn read(&self, key: &[u8]) -> Result<ReadResult> {
        let value = self.storage.get(key)?;
        let value_hash = match &value {
            Some(v) => crypto::hash_value(v),
            None => crypto::empty_value_hash(),
        };
        Ok(ReadResult {
            key: key.to_vec(),
            value,
            value_hash,
            checkpoint: self.head,
        })
    }

    /// User keys starting with `prefix`, in byte order. Ledger metadata is never listed.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .storage
            .keys_with_prefix(prefix)?
            .into_iter()
            .filter(|k| !k.starts_with(META_PREFIX))
            .collect())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.head
    }

    /// All audit entries in sequence order
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let mut out = Vec::with_capacity(self.head.seq as usize);
        for key in self.storage.keys_with_prefix(EVENT_PREFIX.as_bytes())? {
            if let Some(bytes) = self.storage.get(&key)? {
                let entry: LogEntry = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Audit entries that wrote or deleted `key`
    pub fn history(&self, key: &[u8]) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.event.touches(key))
            .collect())
    }

    /// Re-verify the persisted chain and that it ends at the current head.
    pub fn verify_event_log(&self) -> Result<bool> {
        let entries = self.entries()?;
        if !verify_chain(&entries) {
            return Ok(false);
        }
        let tail = entries.last().map(|e| e.event_hash).unwrap_or([0u8; 32]);
        Ok(tail == self.head.latest_event_hash && entries.len() as u64 == self.head.seq)
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn chain(&self, event: Event, ops: &mut Vec<WriteOp>) -> Result<(Hash32, Checkpoint)> {
        let event_hash = event.hash()?;
        let seq = event.seq();
        let entry = LogEntry { event_hash, event };
        let next = Checkpoint {
            seq,
            latest_event_hash: event_hash,
        };

        let entry_bytes =
            bincode::serialize(&entry).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let head_bytes =
            bincode::serialize(&next).map_err(|e| LedgerError::Serialization(e.to_string()))?;

        ops.push(WriteOp::Put(event_key(seq), entry_bytes));
        ops.push(WriteOp::Put(KEY_HEAD.to_vec(), head_bytes));
        Ok((event_hash, next))
    }
}
