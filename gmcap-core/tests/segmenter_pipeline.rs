use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use gmcap_core::{
    FramePipe, MediaResult, MediaTool, MediaToolError, Segmenter, SegmenterError,
};

struct ScriptedTool {
    duration: Option<f64>,
    fail_extract_at: Option<usize>,
    extracts: Mutex<Vec<(f64, f64)>>,
}

impl ScriptedTool {
    fn with_duration(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            fail_extract_at: None,
            extracts: Mutex::new(Vec::new()),
        }
    }

    fn spans(&self) -> Vec<(f64, f64)> {
        self.extracts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTool for ScriptedTool {
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64> {
        self.duration.ok_or_else(|| MediaToolError::Probe {
            path: source.to_path_buf(),
            detail: "moov atom not found".to_string(),
        })
    }

    async fn extract_clip(
        &self,
        source: &Path,
        start: f64,
        duration: f64,
        dest: &Path,
    ) -> MediaResult<()> {
        let index = {
            let mut extracts = self.extracts.lock().unwrap();
            extracts.push((start, duration));
            extracts.len() - 1
        };
        if self.fail_extract_at == Some(index) {
            return Err(MediaToolError::Extract {
                path: source.to_path_buf(),
                detail: "Invalid data found when processing input".to_string(),
            });
        }
        tokio::fs::write(dest, format!("clip@{start}"))
            .await
            .map_err(|source| MediaToolError::Io {
                path: dest.to_path_buf(),
                source,
            })
    }

    async fn concat(&self, _inputs: &[PathBuf], dest: &Path) -> MediaResult<()> {
        Err(MediaToolError::Concat {
            detail: format!("unexpected concat into {}", dest.display()),
        })
    }

    async fn open_frame_pipe(&self, source: &Path) -> MediaResult<FramePipe> {
        Err(MediaToolError::Decode {
            path: source.to_path_buf(),
            detail: "unexpected decode".to_string(),
        })
    }
}

#[tokio::test]
async fn long_tail_becomes_its_own_clip() {
    let cache = TempDir::new().unwrap();
    let tool = Arc::new(ScriptedTool::with_duration(47.0));
    let segmenter = Segmenter::new(tool.clone(), cache.path());

    let clips = segmenter
        .segment(Path::new("/videos/session.mp4"), 10.0)
        .await
        .unwrap();

    assert_eq!(clips.len(), 5);
    for (index, clip) in clips.iter().enumerate() {
        assert_eq!(
            clip.file_name().unwrap().to_string_lossy(),
            format!("session_clip_{:03}.mp4", index + 1)
        );
        assert!(clip.exists());
    }
    assert_eq!(
        tool.spans(),
        vec![
            (0.0, 10.0),
            (10.0, 10.0),
            (20.0, 10.0),
            (30.0, 10.0),
            (40.0, 10.0)
        ]
    );
}

#[tokio::test]
async fn short_tail_is_dropped() {
    let cache = TempDir::new().unwrap();
    let tool = Arc::new(ScriptedTool::with_duration(45.0));
    let segmenter = Segmenter::new(tool, cache.path());

    let clips = segmenter
        .segment(Path::new("/videos/session.mp4"), 10.0)
        .await
        .unwrap();

    assert_eq!(clips.len(), 4);
}

#[tokio::test]
async fn probe_failure_carries_tool_diagnostics() {
    let cache = TempDir::new().unwrap();
    let tool = Arc::new(ScriptedTool {
        duration: None,
        fail_extract_at: None,
        extracts: Mutex::new(Vec::new()),
    });
    let segmenter = Segmenter::new(tool, cache.path());

    let err = segmenter
        .segment(Path::new("/videos/broken.mp4"), 10.0)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("moov atom not found"));
}

#[tokio::test]
async fn failed_extraction_aborts_and_keeps_earlier_clips() {
    let cache = TempDir::new().unwrap();
    let tool = Arc::new(ScriptedTool {
        duration: Some(40.0),
        fail_extract_at: Some(2),
        extracts: Mutex::new(Vec::new()),
    });
    let segmenter = Segmenter::new(tool, cache.path());

    let err = segmenter
        .segment(Path::new("/videos/session.mp4"), 10.0)
        .await
        .unwrap_err();
    assert!(matches!(err, SegmenterError::Tool(_)));

    let dir = cache.path().join("session");
    assert!(dir.join("session_clip_001.mp4").exists());
    assert!(dir.join("session_clip_002.mp4").exists());
    assert!(!dir.join("session_clip_003.mp4").exists());
}

#[tokio::test]
async fn non_positive_clip_duration_is_rejected() {
    let cache = TempDir::new().unwrap();
    let tool = Arc::new(ScriptedTool::with_duration(30.0));
    let segmenter = Segmenter::new(tool, cache.path());

    let err = segmenter
        .segment(Path::new("/videos/session.mp4"), 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, SegmenterError::InvalidDuration(_)));
}
