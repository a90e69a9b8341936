//! Parallel frame transfers between a local directory and the store.

use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use vstyle_storage::{content_type_for, ObjectStore, StorageResult};

/// Upload `dir/{name}` to `{prefix}/{name}` for every name.
pub async fn upload_frames(
    store: &Arc<dyn ObjectStore>,
    dir: &Path,
    prefix: &str,
    names: &[String],
    concurrency: usize,
) -> StorageResult<()> {
    stream::iter(names)
        .map(|name| {
            let key = format!("{}/{}", prefix, name);
            let path = dir.join(name);
            async move { store.put_file(&path, &key, content_type_for(&key)).await }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect::<Vec<()>>()
        .await?;
    Ok(())
}

/// Download `{prefix}/{name}` to `dir/{name}` for every name.
pub async fn download_frames(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    dir: &Path,
    names: &[String],
    concurrency: usize,
) -> StorageResult<()> {
    stream::iter(names)
        .map(|name| {
            let key = format!("{}/{}", prefix, name);
            let path = dir.join(name);
            async move { store.get_file(&key, &path).await }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect::<Vec<()>>()
        .await?;
    Ok(())
}

/// Remove a scratch directory, ignoring one that is already gone.
pub(crate) async fn remove_scratch(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove scratch dir {}: {}", dir.display(), e);
        }
    }
}
