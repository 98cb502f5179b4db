//! Deterministic fixed-duration segmentation of a source video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::media::{MediaTool, MediaToolError};

#[derive(Debug, Error)]
pub enum SegmenterError {
    #[error(transparent)]
    Tool(#[from] MediaToolError),
    #[error("invalid clip duration: {0}")]
    InvalidDuration(f64),
    #[error("source path has no file stem: {0}")]
    BadSource(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type SegmenterResult<T> = std::result::Result<T, SegmenterError>;

/// Trailing remainder at or below this many seconds is dropped; above it,
/// the remainder becomes its own shorter clip.
pub const DEFAULT_TAIL_THRESHOLD_SECONDS: f64 = 5.0;

pub struct Segmenter {
    tool: Arc<dyn MediaTool>,
    cache_dir: PathBuf,
    tail_threshold: f64,
}

impl Segmenter {
    pub fn new<P: Into<PathBuf>>(tool: Arc<dyn MediaTool>, cache_dir: P) -> Self {
        Self {
            tool,
            cache_dir: cache_dir.into(),
            tail_threshold: DEFAULT_TAIL_THRESHOLD_SECONDS,
        }
    }

    pub fn with_tail_threshold(mut self, seconds: f64) -> Self {
        self.tail_threshold = seconds;
        self
    }

    pub fn clip_count(&self, total: f64, clip_duration: f64) -> usize {
        let full = (total / clip_duration).floor() as usize;
        let remainder = total % clip_duration;
        if remainder > self.tail_threshold {
            full + 1
        } else {
            full
        }
    }

    /// Partition `source` into ordered clips of `clip_duration` seconds
    /// under `clips_cache/<stem>/`.
    ///
    /// The first failed extraction aborts the run with the tool's
    /// diagnostic text; clips already produced are left in place, so a
    /// failed run requires manual cache cleanup. Concurrent segmentation
    /// of the same source into the same cache directory is unsupported;
    /// callers must serialize per source name.
    pub async fn segment(
        &self,
        source: &Path,
        clip_duration: f64,
    ) -> SegmenterResult<Vec<PathBuf>> {
        if !clip_duration.is_finite() || clip_duration <= 0.0 {
            return Err(SegmenterError::InvalidDuration(clip_duration));
        }
        let total = self.tool.probe_duration(source).await?;
        let count = self.clip_count(total, clip_duration);

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| SegmenterError::BadSource(source.to_path_buf()))?;
        let dir = self.cache_dir.join(&stem);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| SegmenterError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut clips = Vec::with_capacity(count);
        for index in 0..count {
            let dest = dir.join(format!("{stem}_clip_{:03}.mp4", index + 1));
            self.tool
                .extract_clip(source, index as f64 * clip_duration, clip_duration, &dest)
                .await?;
            clips.push(dest);
        }
        info!(
            source = %source.display(),
            total_seconds = total,
            clips = clips.len(),
            "segmented source"
        );
        Ok(clips)
    }
}
