//! Local backup artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Format of the dumped data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Byte copy of an embedded database file.
    Sqlite,
    /// SQL text produced by the dump utility.
    MysqlDump,
}

impl SourceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Sqlite => "sqlite",
            SourceFormat::MysqlDump => "sql",
        }
    }
}

/// A dump on local disk awaiting upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub source_format: SourceFormat,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub compressed: bool,
}

impl BackupArtifact {
    /// File name component, used as the object name under the backup prefix.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `backup_<YYYY-MM-DD_HH-MM-SS>.<ext>`.
pub fn artifact_file_name(format: SourceFormat, created_at: DateTime<Utc>) -> String {
    format!(
        "backup_{}.{}",
        created_at.format("%Y-%m-%d_%H-%M-%S"),
        format.extension()
    )
}

/// Append `.gz` to a path.
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}
