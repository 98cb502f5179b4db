//! Clip stitching and lazy frame playback.
//!
//! `stitch` concatenates ordered clips losslessly into a scratch artifact
//! that deletes itself on drop. `play` re-exposes a video as a bounded
//! stream of independently encoded JPEG frames, optionally routed through
//! a pure per-frame transform. Decode resources are scoped to the stream:
//! exhaustion, consumer cancellation and decode errors all tear the
//! decoder down.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use tempfile::TempPath;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::media::{FramePipe, MediaTool, MediaToolError};

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Tool(#[from] MediaToolError),
    #[error("no clips to stitch")]
    NoClips,
    #[error("frame transcode failed: {0}")]
    Frame(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

/// Pure per-frame transform. Must stay within roughly one frame interval;
/// slow transforms stall the stream.
pub trait FrameTransform: Send + Sync {
    fn apply(&self, frame: DynamicImage) -> DynamicImage;
}

/// Stream of encoded frames produced by [`Player::play`]. Finite and not
/// restartable; dropping it cancels the decode.
pub type FrameStream = ReceiverStream<PlayerResult<Vec<u8>>>;

/// A stitched artifact in the scratch directory. The backing file is
/// deleted when this value drops.
#[derive(Debug)]
pub struct StitchedClip {
    path: PathBuf,
    _temp: TempPath,
}

impl StitchedClip {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct Player {
    tool: Arc<dyn MediaTool>,
    scratch_dir: PathBuf,
}

impl Player {
    pub fn new<P: Into<PathBuf>>(tool: Arc<dyn MediaTool>, scratch_dir: P) -> Self {
        Self {
            tool,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Losslessly concatenate `clips` in the given order.
    ///
    /// Codec compatibility across clips is the caller's responsibility; a
    /// mismatch surfaces opaquely as [`MediaToolError::Concat`].
    pub async fn stitch(&self, clips: &[PathBuf]) -> PlayerResult<StitchedClip> {
        if clips.is_empty() {
            return Err(PlayerError::NoClips);
        }
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| PlayerError::Io {
                path: self.scratch_dir.clone(),
                source,
            })?;
        let temp = tempfile::Builder::new()
            .prefix("stitched_")
            .suffix(".mp4")
            .tempfile_in(&self.scratch_dir)
            .map_err(|source| PlayerError::Io {
                path: self.scratch_dir.clone(),
                source,
            })?
            .into_temp_path();
        self.tool.concat(clips, &temp).await?;
        debug!(clips = clips.len(), dest = %temp.display(), "stitched clips");
        Ok(StitchedClip {
            path: temp.to_path_buf(),
            _temp: temp,
        })
    }

    /// Open a fresh decode of `source` and yield its frames one by one.
    pub async fn play(
        &self,
        source: &Path,
        transform: Option<Arc<dyn FrameTransform>>,
    ) -> PlayerResult<FrameStream> {
        let pipe = self.tool.open_frame_pipe(source).await?;
        Ok(spawn_pump(pipe, transform, None))
    }

    /// Stitch `clips` and play the result. The stitched artifact lives
    /// exactly as long as the returned stream.
    pub async fn play_stitched(
        &self,
        clips: &[PathBuf],
        transform: Option<Arc<dyn FrameTransform>>,
    ) -> PlayerResult<FrameStream> {
        let stitched = self.stitch(clips).await?;
        let pipe = self.tool.open_frame_pipe(stitched.path()).await?;
        Ok(spawn_pump(pipe, transform, Some(stitched)))
    }
}

fn spawn_pump(
    mut pipe: FramePipe,
    transform: Option<Arc<dyn FrameTransform>>,
    artifact: Option<StitchedClip>,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        // Keep the stitched artifact alive until the decode ends.
        let _artifact = artifact;
        loop {
            let frame = match pipe.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    let _ = tx.send(Err(err.into())).await;
                    break;
                }
            };
            let frame = match &transform {
                Some(transform) => match transcode_frame(transform.as_ref(), &frame) {
                    Ok(frame) => frame,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                },
                None => frame,
            };
            if tx.send(Ok(frame)).await.is_err() {
                // Consumer dropped the stream; the pipe drop kills the
                // decoder.
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

fn transcode_frame(transform: &dyn FrameTransform, encoded: &[u8]) -> PlayerResult<Vec<u8>> {
    let decoded =
        image::load_from_memory(encoded).map_err(|err| PlayerError::Frame(err.to_string()))?;
    let mapped = transform.apply(decoded);
    let mut out = Vec::new();
    mapped
        .write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Jpeg(85))
        .map_err(|err| PlayerError::Frame(err.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, RgbImage};

    struct Grayscale;

    impl FrameTransform for Grayscale {
        fn apply(&self, frame: DynamicImage) -> DynamicImage {
            frame.grayscale()
        }
    }

    #[test]
    fn transcode_roundtrips_through_the_transform() {
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30])))
            .write_to(&mut Cursor::new(&mut source), ImageOutputFormat::Jpeg(90))
            .unwrap();

        let out = transcode_frame(&Grayscale, &source).unwrap();
        assert!(!out.is_empty());
        // Output is itself a decodable JPEG frame.
        let reloaded = image::load_from_memory(&out).unwrap();
        assert_eq!(reloaded.width(), 4);
    }

    #[test]
    fn garbage_bytes_surface_as_frame_error() {
        let err = transcode_frame(&Grayscale, b"not a jpeg").unwrap_err();
        assert!(matches!(err, PlayerError::Frame(_)));
    }
}
