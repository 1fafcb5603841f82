//! Database backup subsystem.
//!
//! # Data Flow
//! ```text
//! backup-cli run
//!     → dump.rs (copy SQLite file, or mysqldump with timeout)
//!     → compress.rs (optional streaming gzip, 512 KiB chunks)
//!     → orchestrator.rs upload (backups/<filename>, local file removed)
//!     → orchestrator.rs prune (delete backups/* older than N days)
//! ```
//!
//! # Design Decisions
//! - Any failed step aborts the run; nothing is retried in-process
//! - Filenames carry a second-resolution timestamp, so re-runs never overwrite
//! - Concurrent runs in the same second need an external lock
//! - Storage and the dump utility are traits so backends can be swapped

pub mod artifact;
pub mod compress;
pub mod dump;
pub mod error;
pub mod orchestrator;
pub mod storage;

pub use artifact::{BackupArtifact, SourceFormat};
pub use dump::{DatabaseSource, DumpTool, MysqlDump, MysqlParams};
pub use error::{BackupError, BackupStage};
pub use orchestrator::{fetch_backup, list_backups, prune, BackupOrchestrator, BackupSummary, BACKUP_PREFIX};
pub use storage::{LocalDiskStorage, MemoryStorage, ObjectMeta, ObjectStorage, StorageError, StorageRegistry};
