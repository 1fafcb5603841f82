//! Streaming gzip compression of artifacts.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::backup::artifact::{gz_path, BackupArtifact};
use crate::backup::error::BackupError;

/// Default read chunk: 512 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Gzip `artifact` next to itself. The source file is removed only after the
/// compressed file is complete and synced.
pub async fn gzip_artifact(artifact: BackupArtifact, chunk_size: usize) -> Result<BackupArtifact, BackupError> {
    tokio::task::spawn_blocking(move || gzip_blocking(artifact, chunk_size))
        .await
        .map_err(|e| BackupError::CompressionFailed(e.to_string()))?
}

fn gzip_blocking(artifact: BackupArtifact, chunk_size: usize) -> Result<BackupArtifact, BackupError> {
    let dest = gz_path(&artifact.path);

    if let Err(e) = stream_gzip(&artifact.path, &dest, chunk_size.max(1)) {
        let _ = fs::remove_file(&dest);
        return Err(BackupError::CompressionFailed(e.to_string()));
    }

    let size_bytes = replace_source(&artifact.path, &dest)?;

    Ok(BackupArtifact {
        path: dest,
        size_bytes,
        compressed: true,
        ..artifact
    })
}

/// Drop `src` once `dest` is complete. On failure `dest` is removed too.
fn replace_source(src: &Path, dest: &Path) -> Result<u64, BackupError> {
    let result = fs::metadata(dest)
        .map(|meta| meta.len())
        .and_then(|len| fs::remove_file(src).map(|()| len));
    result.map_err(|e| {
        let _ = fs::remove_file(dest);
        BackupError::CompressionFailed(e.to_string())
    })
}

fn stream_gzip(src: &Path, dest: &Path, chunk_size: usize) -> std::io::Result<()> {
    let mut input = File::open(src)?;
    let output = File::create(dest)?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());

    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buf[..n])?;
    }

    let file = encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// `1 - compressed/original`; zero for an empty original.
pub fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        1.0 - compressed as f64 / original as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::artifact::SourceFormat;
    use chrono::Utc;
    use flate2::read::GzDecoder;

    fn artifact_with(dir: &Path, bytes: &[u8]) -> BackupArtifact {
        let path = dir.join("backup_2026-01-01_00-00-00.sql");
        fs::write(&path, bytes).unwrap();
        BackupArtifact {
            source_format: SourceFormat::MysqlDump,
            path,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
            compressed: false,
        }
    }

    #[tokio::test]
    async fn test_gzip_round_trip_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        // Larger than one chunk and not a multiple of it.
        let dump: Vec<u8> = (0..1_300_000u32)
            .flat_map(|i| format!("INSERT INTO t VALUES ({});\n", i % 977).into_bytes())
            .take(1_300_000)
            .collect();
        let original = artifact_with(dir.path(), &dump);
        let original_path = original.path.clone();

        let gz = gzip_artifact(original, DEFAULT_CHUNK_SIZE).await.unwrap();
        assert!(gz.compressed);
        assert!(gz.file_name().ends_with(".sql.gz"));
        assert!(!original_path.exists());
        assert!(gz.size_bytes < dump.len() as u64);

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&gz.path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, dump);
    }

    #[tokio::test]
    async fn test_missing_source_keeps_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_with(dir.path(), b"x");
        fs::remove_file(&artifact.path).unwrap();
        let err = gzip_artifact(artifact, 16).await.unwrap_err();
        assert_eq!(err.kind(), "COMPRESSION_FAILED");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_source_removal_drops_compressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("backup.sql.gz");
        fs::write(&dest, b"gz").unwrap();

        let err = replace_source(&dir.path().join("gone.sql"), &dest).unwrap_err();
        assert_eq!(err.kind(), "COMPRESSION_FAILED");
        assert!(!dest.exists());
    }

    #[test]
    fn test_ratio() {
        assert_eq!(compression_ratio(0, 0), 0.0);
        assert!((compression_ratio(1000, 250) - 0.75).abs() < f64::EPSILON);
    }
}
