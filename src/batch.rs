//! Write batches
//!
//! A batch collects puts and removes and is applied as one unit: its
//! records are appended in order, then every KeyDir update becomes visible
//! at once.

use crate::log::LogRecord;

/// A pending operation inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Remove a key
    Remove { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Remove { key } => key,
        }
    }

    /// Log record for this operation, stamped with the current time
    pub fn to_record(&self) -> LogRecord {
        match self {
            BatchOp::Put { key, value } => LogRecord::put(key.clone(), value.clone()),
            BatchOp::Remove { key } => LogRecord::tombstone(key.clone()),
        }
    }
}

/// An ordered group of operations submitted with `Engine::write`
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Remove { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}
