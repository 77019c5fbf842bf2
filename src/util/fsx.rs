//! Filesystem helpers shared by the feed and cache layers.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Build a temp path next to `dst` with an unpredictable suffix, so two
/// writers targeting the same destination never collide on the temp file.
pub fn unique_temp_path(dst: &Path) -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    dst.with_extension(format!("tmp.{:016x}", nanos))
}

/// Atomically write `bytes` to `path` using write-to-temp-then-rename.
///
/// The destination is never observable in a partial state: readers see
/// either the previous content or the complete new content. The temp file
/// is synced to disk before the rename and removed on any failure.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = unique_temp_path(path);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .await?;

    if let Err(e) = write_and_sync(&mut file, bytes).await {
        drop(file);
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

async fn write_and_sync(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        atomic_write(&path, b"hello").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        atomic_write(&path, b"old").await.unwrap();
        atomic_write(&path, b"new").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        atomic_write(&path, b"data").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("out.txt")]);
    }
}
