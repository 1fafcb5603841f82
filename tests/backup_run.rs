use std::fs;
use std::io::Read;
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use marketplace_ops::backup::{list_backups, BackupOrchestrator, StorageRegistry};
use marketplace_ops::config::{parse_config, AppConfig};

fn config_for(dir: &std::path::Path) -> AppConfig {
    let toml = format!(
        r#"
[database]
driver = "sqlite"
path = "{db}"

[backup]
work_dir = "{work}"

[backup.storage.local]
kind = "local"
root = "{root}"
"#,
        db = dir.join("database.sqlite").display(),
        work = dir.join("tmp").display(),
        root = dir.join("remote").display(),
    );
    parse_config(&toml).unwrap()
}

fn age(path: &std::path::Path, days: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(days * 86_400))
        .unwrap();
}

#[tokio::test]
async fn test_sqlite_backup_compressed_and_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let database = b"SQLite format 3\0".repeat(4096);
    fs::write(dir.path().join("database.sqlite"), &database).unwrap();

    let remote = dir.path().join("remote").join("backups");
    fs::create_dir_all(&remote).unwrap();
    for (name, days) in [("backup_old.sqlite.gz", 45), ("backup_recent.sqlite.gz", 5)] {
        let path = remote.join(name);
        fs::write(&path, b"stale").unwrap();
        age(&path, days);
    }

    let config = config_for(dir.path());
    let registry = StorageRegistry::from_config(&config.backup);
    let storage = registry.get("local").unwrap();

    let summary = BackupOrchestrator::from_config(&config)
        .run(storage.as_ref(), true, 30)
        .await
        .unwrap();

    assert!(summary.remote_path.starts_with("backups/backup_"));
    assert!(summary.remote_path.ends_with(".sqlite.gz"));
    assert_eq!(summary.pruned, 1);
    assert!(summary.compression_ratio.unwrap() > 0.5);

    let uploaded = dir.path().join("remote").join(&summary.remote_path);
    let mut restored = Vec::new();
    GzDecoder::new(fs::File::open(&uploaded).unwrap())
        .read_to_end(&mut restored)
        .unwrap();
    assert_eq!(restored, database);

    assert!(!remote.join("backup_old.sqlite.gz").exists());
    assert!(remote.join("backup_recent.sqlite.gz").exists());
    // Nothing left behind in the work directory.
    assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);

    let listed = list_backups(storage.as_ref()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].path, summary.remote_path);
}

#[tokio::test]
async fn test_missing_database_fails_without_upload() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let registry = StorageRegistry::from_config(&config.backup);
    let storage = registry.get("local").unwrap();

    let err = BackupOrchestrator::from_config(&config)
        .run(storage.as_ref(), false, 30)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SOURCE_MISSING");
    assert!(list_backups(storage.as_ref()).await.unwrap().is_empty());
}
