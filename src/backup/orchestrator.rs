//! Backup run: dump → compress → upload → retain.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backup::artifact::BackupArtifact;
use crate::backup::compress::{compression_ratio, gzip_artifact};
use crate::backup::dump::{dump_database, remove_quietly, DatabaseSource, DumpTool, MysqlDump};
use crate::backup::error::{BackupError, BackupStage};
use crate::backup::storage::{ObjectMeta, ObjectStorage};
use crate::config::AppConfig;
use crate::observability::metrics;

/// Fixed object prefix for every backup.
pub const BACKUP_PREFIX: &str = "backups/";

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub run_id: Uuid,
    pub filename: String,
    pub remote_path: String,
    pub original_size: u64,
    pub final_size: u64,
    /// `1 - compressed/original` when compressed.
    pub compression_ratio: Option<f64>,
    pub pruned: usize,
    pub duration: Duration,
}

impl fmt::Display for BackupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backup uploaded to {} ({}", self.remote_path, human_size(self.final_size))?;
        if let Some(ratio) = self.compression_ratio {
            write!(
                f,
                ", {} before compression, {:.1}% saved",
                human_size(self.original_size),
                ratio * 100.0
            )?;
        }
        write!(
            f,
            "); pruned {} old backup(s) in {:.2}s",
            self.pruned,
            self.duration.as_secs_f64()
        )
    }
}

/// Render a byte count with a binary unit.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Produces, uploads, and ages out database backups.
pub struct BackupOrchestrator {
    source: DatabaseSource,
    dump_tool: Arc<dyn DumpTool>,
    work_dir: PathBuf,
    chunk_size: usize,
    dump_timeout: Duration,
}

impl BackupOrchestrator {
    pub fn new(
        source: DatabaseSource,
        dump_tool: Arc<dyn DumpTool>,
        work_dir: impl Into<PathBuf>,
        chunk_size: usize,
        dump_timeout: Duration,
    ) -> Self {
        Self {
            source,
            dump_tool,
            work_dir: work_dir.into(),
            chunk_size,
            dump_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            DatabaseSource::from_config(&config.database),
            Arc::new(MysqlDump::new(config.backup.dump_binary.clone())),
            &config.backup.work_dir,
            config.backup.chunk_size,
            Duration::from_secs(config.backup.dump_timeout_secs),
        )
    }

    /// Run one backup against `storage`.
    pub async fn run(
        &self,
        storage: &dyn ObjectStorage,
        compress: bool,
        retention_days: u32,
    ) -> Result<BackupSummary, BackupError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(%run_id, compress, retention_days, "Backup started");

        let result = self.run_inner(run_id, started, storage, compress, retention_days).await;
        match &result {
            Ok(summary) => {
                metrics::record_backup("success", summary.final_size);
                tracing::info!(
                    %run_id,
                    remote_path = %summary.remote_path,
                    size = summary.final_size,
                    pruned = summary.pruned,
                    "Backup completed"
                );
            }
            Err(e) => {
                metrics::record_backup("failure", 0);
                tracing::error!(%run_id, stage = %e.stage(), kind = e.kind(), error = %e, "Backup failed");
            }
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        started: Instant,
        storage: &dyn ObjectStorage,
        compress: bool,
        retention_days: u32,
    ) -> Result<BackupSummary, BackupError> {
        let now = Utc::now();
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(BackupError::io(BackupStage::Setup))?;

        let artifact = dump_database(
            &self.source,
            self.dump_tool.as_ref(),
            &self.work_dir,
            now,
            self.dump_timeout,
        )
        .await?;
        let original_size = artifact.size_bytes;
        tracing::info!(%run_id, path = %artifact.path.display(), size = original_size, "Dump written");

        let artifact = if compress {
            let raw_path = artifact.path.clone();
            match gzip_artifact(artifact, self.chunk_size).await {
                Ok(gz) => {
                    tracing::info!(%run_id, size = gz.size_bytes, "Dump compressed");
                    gz
                }
                Err(e) => {
                    remove_quietly(&raw_path).await;
                    return Err(e);
                }
            }
        } else {
            artifact
        };

        let remote_path = upload(storage, &artifact).await?;
        let pruned = prune(storage, retention_days, now).await?;

        Ok(BackupSummary {
            run_id,
            filename: artifact.file_name(),
            remote_path,
            original_size,
            final_size: artifact.size_bytes,
            compression_ratio: artifact
                .compressed
                .then(|| compression_ratio(original_size, artifact.size_bytes)),
            pruned,
            duration: started.elapsed(),
        })
    }
}

/// Push `artifact` under the backup prefix, then delete it locally.
pub async fn upload(storage: &dyn ObjectStorage, artifact: &BackupArtifact) -> Result<String, BackupError> {
    let remote_path = format!("{BACKUP_PREFIX}{}", artifact.file_name());

    let bytes = match tokio::fs::read(&artifact.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            remove_quietly(&artifact.path).await;
            return Err(BackupError::io(BackupStage::Upload)(e));
        }
    };

    if let Err(e) = storage.put(&remote_path, bytes).await {
        remove_quietly(&artifact.path).await;
        return Err(BackupError::UploadFailed {
            path: remote_path,
            reason: e.to_string(),
        });
    }

    remove_quietly(&artifact.path).await;
    Ok(remote_path)
}

/// Delete every backup strictly older than `now - retention_days`.
pub async fn prune(
    storage: &dyn ObjectStorage,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<usize, BackupError> {
    let cutoff = now - chrono::Duration::days(i64::from(retention_days));
    let objects = storage
        .list(BACKUP_PREFIX)
        .await
        .map_err(|e| BackupError::RetentionListFailed(e.to_string()))?;

    let mut deleted = 0;
    for object in objects
        .iter()
        .filter(|o| o.path.starts_with(BACKUP_PREFIX) && o.last_modified < cutoff)
    {
        match storage.delete(&object.path).await {
            Ok(()) => {
                deleted += 1;
                tracing::info!(path = %object.path, last_modified = %object.last_modified, "Deleted expired backup");
            }
            Err(e) => {
                tracing::warn!(path = %object.path, error = %e, "Failed to delete expired backup");
            }
        }
    }

    metrics::record_pruned(deleted);
    Ok(deleted)
}

/// Backups under the prefix, newest first.
pub async fn list_backups(storage: &dyn ObjectStorage) -> Result<Vec<ObjectMeta>, BackupError> {
    let mut objects = storage
        .list(BACKUP_PREFIX)
        .await
        .map_err(|e| BackupError::RetentionListFailed(e.to_string()))?;
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then_with(|| b.path.cmp(&a.path)));
    Ok(objects)
}

/// Download `filename` from the backup prefix into `dest`. Returns bytes written.
pub async fn fetch_backup(storage: &dyn ObjectStorage, filename: &str, dest: &Path) -> Result<u64, BackupError> {
    let remote_path = if filename.starts_with(BACKUP_PREFIX) {
        filename.to_string()
    } else {
        format!("{BACKUP_PREFIX}{filename}")
    };
    let bytes = storage
        .read(&remote_path)
        .await
        .map_err(|e| BackupError::DownloadFailed {
            path: remote_path.clone(),
            reason: e.to_string(),
        })?;
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(BackupError::io(BackupStage::Fetch))?;
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::dump::MysqlParams;
    use crate::backup::storage::{MemoryStorage, StorageError};
    use async_trait::async_trait;

    /// Writes fixed bytes, or fails with a fixed exit code.
    struct ScriptedDump {
        output: Vec<u8>,
        exit_code: Option<i32>,
    }

    #[async_trait]
    impl DumpTool for ScriptedDump {
        async fn dump(&self, _params: &MysqlParams, dest: &Path, _timeout: Duration) -> Result<(), BackupError> {
            tokio::fs::write(dest, &self.output)
                .await
                .map_err(BackupError::io(BackupStage::Dump))?;
            match self.exit_code {
                None => Ok(()),
                Some(code) => Err(BackupError::DumpToolFailed {
                    exit_code: Some(code),
                    timeout: false,
                    stderr: "mysqldump: Got error: 1045".to_string(),
                }),
            }
        }
    }

    struct BrokenStorage;

    #[async_trait]
    impl ObjectStorage for BrokenStorage {
        async fn put(&self, _path: &str, _bytes: Vec<u8>) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::other("bucket unreachable")))
        }
        async fn list(&self, _prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
            Err(StorageError::Io(std::io::Error::other("bucket unreachable")))
        }
        async fn delete(&self, _path: &str) -> Result<(), StorageError> {
            Ok(())
        }
        async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(path.to_string()))
        }
    }

    fn mysql_orchestrator(work: &Path, output: &[u8], exit_code: Option<i32>) -> BackupOrchestrator {
        BackupOrchestrator::new(
            DatabaseSource::MySql(MysqlParams {
                host: "localhost".to_string(),
                port: 3306,
                database: "marketplace".to_string(),
                username: "root".to_string(),
                password: String::new(),
            }),
            Arc::new(ScriptedDump {
                output: output.to_vec(),
                exit_code,
            }),
            work,
            64 * 1024,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_run_uploads_and_cleans_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new();
        let orchestrator = mysql_orchestrator(dir.path(), b"CREATE TABLE users (id INT);\n", None);

        let summary = orchestrator.run(&storage, false, 30).await.unwrap();
        assert!(summary.remote_path.starts_with("backups/backup_"));
        assert!(summary.remote_path.ends_with(".sql"));
        assert_eq!(summary.compression_ratio, None);
        assert_eq!(summary.original_size, summary.final_size);
        assert!(storage.contains(&summary.remote_path));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_compressed_run_decompresses_to_plain_dump() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dump: Vec<u8> = b"INSERT INTO teachers VALUES (1, 'Ada');\n".repeat(5000);
        let dir = tempfile::tempdir().unwrap();

        let plain_storage = MemoryStorage::new();
        let plain = mysql_orchestrator(dir.path(), &dump, None)
            .run(&plain_storage, false, 30)
            .await
            .unwrap();

        let gz_storage = MemoryStorage::new();
        let gz = mysql_orchestrator(dir.path(), &dump, None)
            .run(&gz_storage, true, 30)
            .await
            .unwrap();
        assert!(gz.remote_path.ends_with(".sql.gz"));
        assert!(gz.final_size < gz.original_size);
        assert!(gz.compression_ratio.unwrap() > 0.5);

        let plain_bytes = plain_storage.read(&plain.remote_path).await.unwrap();
        let gz_bytes = gz_storage.read(&gz.remote_path).await.unwrap();
        let mut decoded = Vec::new();
        GzDecoder::new(&gz_bytes[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, plain_bytes);
        assert_eq!(decoded, dump);
    }

    #[tokio::test]
    async fn test_dump_failure_aborts_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new();
        let err = mysql_orchestrator(dir.path(), b"partial", Some(2))
            .run(&storage, true, 30)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), BackupStage::Dump);
        assert!(storage.paths().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_and_local_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let err = mysql_orchestrator(dir.path(), b"data", None)
            .run(&BrokenStorage, false, 30)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UPLOAD_FAILED");
        assert_eq!(err.stage(), BackupStage::Upload);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_prune_respects_cutoff_exactly() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let day = chrono::Duration::days(1);
        storage.insert_at("backups/ancient.sql.gz", vec![1], now - day * 90);
        storage.insert_at("backups/just_old.sql.gz", vec![1], now - day * 30 - chrono::Duration::seconds(1));
        storage.insert_at("backups/at_cutoff.sql.gz", vec![1], now - day * 30);
        storage.insert_at("backups/recent.sql.gz", vec![1], now - day);
        storage.insert_at("exports/ancient.csv", vec![1], now - day * 90);

        let deleted = prune(&storage, 30, now).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            storage.paths(),
            ["backups/at_cutoff.sql.gz", "backups/recent.sql.gz", "exports/ancient.csv"]
        );

        let cutoff = now - day * 30;
        for object in storage.list(BACKUP_PREFIX).await.unwrap() {
            assert!(object.last_modified >= cutoff);
        }
    }

    #[tokio::test]
    async fn test_prune_list_failure() {
        let err = prune(&BrokenStorage, 7, Utc::now()).await.unwrap_err();
        assert_eq!(err.kind(), "RETENTION_LIST_FAILED");
    }

    #[tokio::test]
    async fn test_list_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new();
        let now = Utc::now();
        storage.insert_at("backups/older.sql", b"old".to_vec(), now - chrono::Duration::hours(2));
        storage.insert_at("backups/newer.sql", b"new".to_vec(), now);

        let listed = list_backups(&storage).await.unwrap();
        assert_eq!(listed[0].path, "backups/newer.sql");
        assert_eq!(listed[1].path, "backups/older.sql");

        let dest = dir.path().join("restore.sql");
        assert_eq!(fetch_backup(&storage, "newer.sql", &dest).await.unwrap(), 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");

        let err = fetch_backup(&storage, "missing.sql", &dest).await.unwrap_err();
        assert_eq!(err.kind(), "DOWNLOAD_FAILED");
    }

    #[test]
    fn test_summary_line() {
        let summary = BackupSummary {
            run_id: Uuid::nil(),
            filename: "backup_2026-01-01_00-00-00.sql.gz".to_string(),
            remote_path: "backups/backup_2026-01-01_00-00-00.sql.gz".to_string(),
            original_size: 10 * 1024 * 1024,
            final_size: 2 * 1024 * 1024,
            compression_ratio: Some(0.8),
            pruned: 3,
            duration: Duration::from_millis(1500),
        };
        assert_eq!(
            summary.to_string(),
            "Backup uploaded to backups/backup_2026-01-01_00-00-00.sql.gz (2.0 MiB, 10.0 MiB before compression, 80.0% saved); pruned 3 old backup(s) in 1.50s"
        );
        assert_eq!(human_size(512), "512 B");
    }
}
