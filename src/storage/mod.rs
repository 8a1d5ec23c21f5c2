//! Storage Module
//!
//! Everything above the single-file level: the set of open data files,
//! loading them at startup, appending, and merging.
//!
//! ## Responsibilities
//! - Track readable data files and defer deletion of retired ones
//! - Rebuild the KeyDir from hint files or data file scans
//! - Append puts, removes and batches, rotating at `max_file_size`
//! - Compact sealed files while reads and writes continue
//!
//! ## Directory Layout
//! ```text
//! data_dir/
//! ├── LOCK          exclusive advisory lock while open
//! ├── 0.data        sealed
//! ├── 0.hint
//! ├── 1.data        sealed
//! ├── 1.hint
//! └── 2.data        active (no hint until sealed)
//! ```

mod compaction;
mod recovery;
mod registry;
mod writer;

pub use compaction::{CompactionStats, Compactor};
pub use recovery::{Loader, RecoveryStats};
pub use registry::FileRegistry;
pub use writer::Writer;
