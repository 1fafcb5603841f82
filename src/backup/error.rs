//! Backup error taxonomy.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Step of a backup run an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Setup,
    Dump,
    Compress,
    Upload,
    Retention,
    Fetch,
}

impl BackupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStage::Setup => "setup",
            BackupStage::Dump => "dump",
            BackupStage::Compress => "compress",
            BackupStage::Upload => "upload",
            BackupStage::Retention => "retention",
            BackupStage::Fetch => "fetch",
        }
    }
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a backup run.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Embedded database file does not exist.
    #[error("database file not found: {}", .path.display())]
    SourceMissing { path: PathBuf },

    /// Dump utility exited non-zero, could not start, or overran its timeout.
    #[error("dump tool failed: {}", describe_dump(.exit_code, .timeout, .stderr))]
    DumpToolFailed {
        exit_code: Option<i32>,
        timeout: bool,
        stderr: String,
    },

    /// Dump utility succeeded but wrote nothing.
    #[error("dump produced an empty file: {}", .path.display())]
    EmptyArtifact { path: PathBuf },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("upload to {path} failed: {reason}")]
    UploadFailed { path: String, reason: String },

    #[error("listing backups failed: {0}")]
    RetentionListFailed(String),

    #[error("download of {path} failed: {reason}")]
    DownloadFailed { path: String, reason: String },

    #[error("unknown storage target {0:?}")]
    UnknownStorage(String),

    /// Target keeps objects in process memory only.
    #[error("storage target {0:?} does not outlive the process")]
    EphemeralStorage(String),

    #[error("{stage} I/O error: {source}")]
    Io {
        stage: BackupStage,
        #[source]
        source: std::io::Error,
    },
}

fn describe_dump(exit_code: &Option<i32>, timeout: &bool, stderr: &str) -> String {
    let mut out = if *timeout {
        "timed out".to_string()
    } else {
        match exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated without exit code".to_string(),
        }
    };
    if !stderr.is_empty() {
        out.push_str(": ");
        out.push_str(stderr);
    }
    out
}

impl BackupError {
    pub fn io(stage: BackupStage) -> impl FnOnce(std::io::Error) -> Self {
        move |source| BackupError::Io { stage, source }
    }

    pub fn stage(&self) -> BackupStage {
        match self {
            BackupError::SourceMissing { .. }
            | BackupError::DumpToolFailed { .. }
            | BackupError::EmptyArtifact { .. } => BackupStage::Dump,
            BackupError::CompressionFailed(_) => BackupStage::Compress,
            BackupError::UploadFailed { .. } => BackupStage::Upload,
            BackupError::RetentionListFailed(_) => BackupStage::Retention,
            BackupError::DownloadFailed { .. } => BackupStage::Fetch,
            BackupError::UnknownStorage(_) | BackupError::EphemeralStorage(_) => BackupStage::Setup,
            BackupError::Io { stage, .. } => *stage,
        }
    }

    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::SourceMissing { .. } => "SOURCE_MISSING",
            BackupError::DumpToolFailed { .. } => "DUMP_TOOL_FAILED",
            BackupError::EmptyArtifact { .. } => "EMPTY_ARTIFACT",
            BackupError::CompressionFailed(_) => "COMPRESSION_FAILED",
            BackupError::UploadFailed { .. } => "UPLOAD_FAILED",
            BackupError::RetentionListFailed(_) => "RETENTION_LIST_FAILED",
            BackupError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            BackupError::UnknownStorage(_) => "UNKNOWN_STORAGE",
            BackupError::EphemeralStorage(_) => "EPHEMERAL_STORAGE",
            BackupError::Io { .. } => "IO_ERROR",
        }
    }
}
