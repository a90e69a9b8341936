//! Test doubles for the codec and the transformer.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use vstyle_media::{FrameTransformer, MediaCodec, MediaError, MediaResult};
use vstyle_models::{StorageLayout, VideoJob};
use vstyle_storage::{MemoryStore, ObjectStore};

/// Codec that writes `frame-{i}` images and concatenates them back.
pub struct FakeCodec {
    frames: u32,
    fail: bool,
    layout: StorageLayout,
    pub muxes: AtomicU32,
}

impl FakeCodec {
    pub fn new(frames: u32) -> Self {
        Self {
            frames,
            fail: false,
            layout: StorageLayout::default(),
            muxes: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0)
        }
    }
}

#[async_trait]
impl MediaCodec for FakeCodec {
    async fn split(&self, video: &Path, frames_dir: &Path, audio: &Path) -> MediaResult<()> {
        if self.fail {
            return Err(MediaError::ffmpeg_failed("split failed", None, Some(1)));
        }
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        tokio::fs::create_dir_all(frames_dir).await?;
        for i in 0..self.frames {
            let index = self.layout.first_index + i;
            let name = self.layout.frame_filename(index);
            tokio::fs::write(frames_dir.join(name), format!("frame-{}", index)).await?;
        }
        if self.frames > 0 {
            tokio::fs::write(audio, b"audio").await?;
        }
        Ok(())
    }

    /// Reads the image sequence the way FFmpeg does: from the first index
    /// until the first missing file.
    async fn mux(&self, frames_dir: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        if self.fail {
            return Err(MediaError::ffmpeg_failed("mux failed", None, Some(1)));
        }
        let mut out = Vec::new();
        let mut index = self.layout.first_index;
        loop {
            let path = frames_dir.join(self.layout.frame_filename(index));
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    out.extend(bytes);
                    out.push(b'\n');
                }
                Err(_) => break,
            }
            index += 1;
        }
        out.extend(b"audio=");
        out.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, out).await?;
        self.muxes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Uppercases the image bytes and prefixes the style.
pub struct UppercaseTransformer;

#[async_trait]
impl FrameTransformer for UppercaseTransformer {
    fn name(&self) -> &str {
        "uppercase"
    }

    async fn transform(&self, input: &Path, output: &Path, style: Option<&str>) -> MediaResult<()> {
        let data = tokio::fs::read(input).await?;
        let mut out = format!("{}:", style.unwrap_or("none")).into_bytes();
        out.extend(data.to_ascii_uppercase());
        tokio::fs::write(output, out).await?;
        Ok(())
    }
}

/// Put `count` input frames for `video`, starting at the first index.
pub async fn seed_input_frames(store: &MemoryStore, video: &VideoJob, count: u32) {
    for i in 0..count {
        let index = video.layout.first_index + i;
        let key = format!("{}/{}", video.input_prefix, video.layout.frame_filename(index));
        store
            .put_bytes(&key, format!("frame-{}", index).into_bytes(), "image/jpeg")
            .await
            .unwrap();
    }
}

/// Put transformed frames for the given indices.
pub async fn seed_output_frames(store: &MemoryStore, video: &VideoJob, indices: impl IntoIterator<Item = u32>) {
    for index in indices {
        let key = format!("{}/{}", video.output_prefix, video.layout.frame_filename(index));
        store
            .put_bytes(&key, format!("FRAME-{}", index).into_bytes(), "image/jpeg")
            .await
            .unwrap();
    }
}
