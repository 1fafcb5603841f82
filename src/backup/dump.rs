//! Producing the raw dump.
//!
//! Embedded databases are copied byte for byte. Client/server databases go
//! through a `DumpTool`, normally the `mysqldump` binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::backup::artifact::{artifact_file_name, BackupArtifact, SourceFormat};
use crate::backup::error::{BackupError, BackupStage};
use crate::config::{DatabaseConfig, DatabaseDriver};

/// Connection parameters for a client/server database.
#[derive(Clone, PartialEq, Eq)]
pub struct MysqlParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for MysqlParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSource {
    Sqlite { path: PathBuf },
    MySql(MysqlParams),
}

impl DatabaseSource {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        match config.driver {
            DatabaseDriver::Sqlite => DatabaseSource::Sqlite {
                path: PathBuf::from(&config.path),
            },
            DatabaseDriver::Mysql => DatabaseSource::MySql(MysqlParams {
                host: config.host.clone(),
                port: config.port,
                database: config.database.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
            }),
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            DatabaseSource::Sqlite { .. } => SourceFormat::Sqlite,
            DatabaseSource::MySql(_) => SourceFormat::MysqlDump,
        }
    }
}

/// Capability to dump a client/server database into a file.
#[async_trait]
pub trait DumpTool: Send + Sync {
    async fn dump(&self, params: &MysqlParams, dest: &Path, timeout: Duration) -> Result<(), BackupError>;
}

/// `mysqldump` subprocess.
#[derive(Debug, Clone)]
pub struct MysqlDump {
    binary: String,
}

impl MysqlDump {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command line without stdio wiring. The password travels in the
    /// environment so it never shows up in the process list.
    pub fn command(&self, params: &MysqlParams) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--host={}", params.host))
            .arg(format!("--port={}", params.port))
            .arg(format!("--user={}", params.username))
            .args(["--single-transaction", "--routines", "--triggers"])
            .arg(&params.database)
            .env("MYSQL_PWD", &params.password);
        cmd
    }
}

impl Default for MysqlDump {
    fn default() -> Self {
        Self::new("mysqldump")
    }
}

#[async_trait]
impl DumpTool for MysqlDump {
    async fn dump(&self, params: &MysqlParams, dest: &Path, timeout: Duration) -> Result<(), BackupError> {
        let file = std::fs::File::create(dest).map_err(BackupError::io(BackupStage::Dump))?;
        let mut cmd = self.command(params);
        cmd.stdout(Stdio::from(file));
        run_with_timeout(cmd, timeout).await
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
pub async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<(), BackupError> {
    cmd.stdin(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| BackupError::DumpToolFailed {
        exit_code: None,
        timeout: false,
        stderr: e.to_string(),
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(BackupError::io(BackupStage::Dump))?,
        Err(_) => {
            return Err(BackupError::DumpToolFailed {
                exit_code: None,
                timeout: true,
                stderr: String::new(),
            })
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(BackupError::DumpToolFailed {
            exit_code: output.status.code(),
            timeout: false,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Dump `source` into `work_dir`, named after `created_at`.
pub async fn dump_database(
    source: &DatabaseSource,
    tool: &dyn DumpTool,
    work_dir: &Path,
    created_at: DateTime<Utc>,
    timeout: Duration,
) -> Result<BackupArtifact, BackupError> {
    let dest = work_dir.join(artifact_file_name(source.format(), created_at));

    match source {
        DatabaseSource::Sqlite { path } => {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(BackupError::SourceMissing { path: path.clone() });
            }
            tokio::fs::copy(path, &dest)
                .await
                .map_err(BackupError::io(BackupStage::Dump))?;
        }
        DatabaseSource::MySql(params) => {
            tracing::info!(host = %params.host, database = %params.database, "Running database dump");
            if let Err(e) = tool.dump(params, &dest, timeout).await {
                remove_quietly(&dest).await;
                return Err(e);
            }
        }
    }

    let size_bytes = tokio::fs::metadata(&dest)
        .await
        .map_err(BackupError::io(BackupStage::Dump))?
        .len();

    if size_bytes == 0 && source.format() == SourceFormat::MysqlDump {
        remove_quietly(&dest).await;
        return Err(BackupError::EmptyArtifact { path: dest });
    }

    Ok(BackupArtifact {
        source_format: source.format(),
        path: dest,
        size_bytes,
        created_at,
        compressed: false,
    })
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove local artifact");
        }
    }
}
