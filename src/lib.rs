//! # CaskKV
//!
//! A log-structured, Bitcask-style key-value store with:
//! - Append-only data files with CRC32-protected records
//! - An in-memory KeyDir for single-seek reads
//! - Hint files for fast startup, with data-file scan fallback
//! - Atomic write batches and point-in-time snapshots
//! - Online compaction with deferred deletion of retired files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │            (Single Writer / Multi Reader)                    │
//! └──────┬──────────────────┬──────────────────┬────────────────┘
//!        │ put/remove/write │ get              │ compact
//!        ▼                  ▼                  ▼
//!   ┌─────────┐      ┌─────────────┐    ┌─────────────┐
//!   │ Writer  │─────▶│   KeyDir    │◀───│  Compactor  │
//!   │(active) │      │  (RwLock)   │    │             │
//!   └────┬────┘      └──────┬──────┘    └──────┬──────┘
//!        │                  │ snapshot         │
//!        ▼                  ▼                  ▼
//!   ┌─────────────────────────────────────────────────┐
//!   │        Data Files ({id}.data + {id}.hint)        │
//!   └─────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod lock;

pub mod log;
pub mod keydir;
pub mod storage;
pub mod batch;
pub mod snapshot;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::{Config, SyncStrategy};
pub use batch::Batch;
pub use snapshot::Snapshot;
pub use storage::{CompactionStats, RecoveryStats};
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
