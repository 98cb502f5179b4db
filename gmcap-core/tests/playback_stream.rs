use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_stream::StreamExt;

use gmcap_core::{
    FramePipe, MediaResult, MediaTool, MediaToolError, Player, PlayerError,
};

fn fake_jpeg(tag: u8) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8, 0xFF, 0xE0];
    frame.extend_from_slice(&[tag; 16]);
    frame.extend_from_slice(&[0xFF, 0xD9]);
    frame
}

/// Stand-in tool: concatenation is plain byte concatenation and decoding
/// replays the file bytes, so clip files holding fake MJPEG streams
/// exercise the full stitch-then-play path in-process.
struct ByteTool;

#[async_trait]
impl MediaTool for ByteTool {
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64> {
        Err(MediaToolError::Probe {
            path: source.to_path_buf(),
            detail: "unexpected probe".to_string(),
        })
    }

    async fn extract_clip(
        &self,
        source: &Path,
        _start: f64,
        _duration: f64,
        _dest: &Path,
    ) -> MediaResult<()> {
        Err(MediaToolError::Extract {
            path: source.to_path_buf(),
            detail: "unexpected extract".to_string(),
        })
    }

    async fn concat(&self, inputs: &[PathBuf], dest: &Path) -> MediaResult<()> {
        let mut out = Vec::new();
        for input in inputs {
            let bytes = tokio::fs::read(input)
                .await
                .map_err(|source| MediaToolError::Io {
                    path: input.clone(),
                    source,
                })?;
            out.extend(bytes);
        }
        tokio::fs::write(dest, out)
            .await
            .map_err(|source| MediaToolError::Io {
                path: dest.to_path_buf(),
                source,
            })
    }

    async fn open_frame_pipe(&self, source: &Path) -> MediaResult<FramePipe> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|source_err| MediaToolError::Io {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        Ok(FramePipe::from_reader(Cursor::new(bytes)))
    }
}

fn write_clip(dir: &Path, name: &str, tags: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::new();
    for tag in tags {
        bytes.extend(fake_jpeg(*tag));
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn stitched_playback_yields_frames_in_clip_order() {
    let clips_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();

    let clips = vec![
        write_clip(clips_dir.path(), "Clip001.webm", &[0x01, 0x02]),
        write_clip(clips_dir.path(), "Clip002.webm", &[0x03, 0x04]),
        write_clip(clips_dir.path(), "Clip003.webm", &[0x05, 0x06]),
    ];

    let player = Player::new(Arc::new(ByteTool), scratch.path());
    let mut stream = player.play_stitched(&clips, None).await.unwrap();

    let mut tags = Vec::new();
    while let Some(frame) = stream.next().await {
        let frame = frame.unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        tags.push(frame[4]);
    }
    assert_eq!(tags, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
}

#[tokio::test]
async fn stitch_artifact_is_removed_on_drop() {
    let clips_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let clip = write_clip(clips_dir.path(), "Clip001.webm", &[0x0A]);

    let player = Player::new(Arc::new(ByteTool), scratch.path());
    let stitched = player.stitch(&[clip]).await.unwrap();
    let path = stitched.path().to_path_buf();
    assert!(path.exists());

    drop(stitched);
    assert!(!path.exists());
}

#[tokio::test]
async fn stitching_nothing_is_an_error() {
    let scratch = TempDir::new().unwrap();
    let player = Player::new(Arc::new(ByteTool), scratch.path());
    let err = player.stitch(&[]).await.unwrap_err();
    assert!(matches!(err, PlayerError::NoClips));
}

#[tokio::test]
async fn dropping_the_stream_stops_playback() {
    let clips_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let clip = write_clip(clips_dir.path(), "Clip001.webm", &[0x01, 0x02, 0x03]);

    let player = Player::new(Arc::new(ByteTool), scratch.path());
    let mut stream = player.play(&clip, None).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first[4], 0x01);
    drop(stream);
    // The pump task ends on its next send; nothing left to observe but
    // the absence of a hang.
}
