//! High-level storage operations over any [`ObjectStore`].

use tracing::info;
use vstyle_models::{key_basename, StorageLayout};

use crate::error::StorageResult;
use crate::store::ObjectStore;

/// List frame filenames directly under `prefix`, sorted.
///
/// Listing order is backend-defined; the sort makes index order deterministic.
/// Objects whose name does not follow the layout's frame naming are skipped,
/// as are objects in nested directories.
pub async fn list_frame_names(
    store: &dyn ObjectStore,
    prefix: &str,
    layout: &StorageLayout,
) -> StorageResult<Vec<String>> {
    let dir = format!("{}/", prefix.trim_end_matches('/'));
    let objects = store.list(&dir).await?;

    let mut names: Vec<String> = objects
        .iter()
        .filter_map(|o| o.key.strip_prefix(&dir))
        .filter(|rest| !rest.contains('/'))
        .filter(|name| layout.is_frame(name))
        .map(str::to_string)
        .collect();

    names.sort();
    names.dedup();
    Ok(names)
}

/// Delete every object under `prefix`.
pub async fn delete_prefix(store: &dyn ObjectStore, prefix: &str) -> StorageResult<u32> {
    let dir = format!("{}/", prefix.trim_end_matches('/'));
    let keys: Vec<String> = store.list(&dir).await?.into_iter().map(|o| o.key).collect();

    if keys.is_empty() {
        return Ok(0);
    }

    let deleted = store.delete_many(&keys).await?;
    info!("Deleted {} objects under {}", deleted, dir);
    Ok(deleted)
}

/// Content type by file extension.
pub fn content_type_for(key: &str) -> &'static str {
    let name = key_basename(key).to_ascii_lowercase();
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("aac") => "audio/aac",
        Some("mp3") => "audio/mpeg",
        Some("log") | Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_list_frame_names_sorts_and_filters() {
        let store = MemoryStore::new();
        for key in [
            "dance/input_frames/000010_frame.jpg",
            "dance/input_frames/000002_frame.jpg",
            "dance/input_frames/000001_frame.jpg",
            "dance/input_frames/thumbs.db",
            "dance/input_frames/nested/000003_frame.jpg",
            "dance/input_frames_old/000004_frame.jpg",
        ] {
            store.put_bytes(key, vec![0], "image/jpeg").await.unwrap();
        }

        let names = list_frame_names(&store, "dance/input_frames", &StorageLayout::default())
            .await
            .unwrap();

        assert_eq!(
            names,
            vec!["000001_frame.jpg", "000002_frame.jpg", "000010_frame.jpg"]
        );
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryStore::new();
        store.put_bytes("v/tmp/a", vec![], "x").await.unwrap();
        store.put_bytes("v/tmp/b", vec![], "x").await.unwrap();
        store.put_bytes("v/keep", vec![], "x").await.unwrap();

        assert_eq!(delete_prefix(&store, "v/tmp").await.unwrap(), 2);
        assert_eq!(store.keys(), vec!["v/keep".to_string()]);
        assert_eq!(delete_prefix(&store, "v/tmp").await.unwrap(), 0);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/000001_frame.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a/audio.aac"), "audio/aac");
        assert_eq!(content_type_for("a/out.mp4"), "video/mp4");
        assert_eq!(content_type_for("a/noext"), "application/octet-stream");
    }
}
