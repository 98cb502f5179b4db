//! Narrow interface over the external media tool.
//!
//! Everything that shells out to ffmpeg/ffprobe lives behind [`MediaTool`],
//! so the pipeline core never depends on a specific invocation syntax and
//! tests can substitute a mock.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum MediaToolError {
    #[error("duration probe failed for {path}: {detail}")]
    Probe { path: PathBuf, detail: String },
    #[error("clip extraction failed for {path}: {detail}")]
    Extract { path: PathBuf, detail: String },
    #[error("concatenation failed: {detail}")]
    Concat { detail: String },
    #[error("frame decode failed for {path}: {detail}")]
    Decode { path: PathBuf, detail: String },
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type MediaResult<T> = std::result::Result<T, MediaToolError>;

/// Probe, extract, concatenate and decode operations on video files.
///
/// Implementations must surface the tool's stderr verbatim on failure so
/// callers can relay the diagnostic text.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Total duration of `source` in seconds.
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64>;

    /// Stream-copy `[start, start + duration)` of `source` into `dest`.
    async fn extract_clip(
        &self,
        source: &Path,
        start: f64,
        duration: f64,
        dest: &Path,
    ) -> MediaResult<()>;

    /// Losslessly concatenate `inputs` in order into `dest`. Inputs must
    /// share codec parameters; a mismatch surfaces as [`MediaToolError::Concat`].
    async fn concat(&self, inputs: &[PathBuf], dest: &Path) -> MediaResult<()>;

    /// Open a frame-by-frame decode of `source` as a stream of
    /// independently encoded JPEG frames.
    async fn open_frame_pipe(&self, source: &Path) -> MediaResult<FramePipe>;
}

/// [`MediaTool`] backed by the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTool {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(ffmpeg: P, ffprobe: Q) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run(&self, command: &mut Command) -> MediaResult<std::process::Output> {
        let tool = command.as_std().get_program().to_string_lossy().to_string();
        command
            .output()
            .await
            .map_err(|source| MediaToolError::Spawn { tool, source })
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("csv=p=0")
            .arg(source);
        let output = self.run(&mut command).await?;
        if !output.status.success() {
            return Err(MediaToolError::Probe {
                path: source.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        trimmed.parse::<f64>().map_err(|_| MediaToolError::Probe {
            path: source.to_path_buf(),
            detail: format!("non-numeric duration output: {trimmed:?}"),
        })
    }

    async fn extract_clip(
        &self,
        source: &Path,
        start: f64,
        duration: f64,
        dest: &Path,
    ) -> MediaResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-v")
            .arg("error")
            .arg("-y")
            .arg("-ss")
            .arg(format!("{start:.3}"))
            .arg("-t")
            .arg(format!("{duration:.3}"))
            .arg("-i")
            .arg(source)
            .arg("-c")
            .arg("copy")
            .arg(dest);
        let output = self.run(&mut command).await?;
        if !output.status.success() {
            return Err(MediaToolError::Extract {
                path: source.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(source = %source.display(), dest = %dest.display(), start, duration, "extracted clip");
        Ok(())
    }

    async fn concat(&self, inputs: &[PathBuf], dest: &Path) -> MediaResult<()> {
        // The concat demuxer wants a listing file; keep it next to the output.
        let list_path = dest.with_extension("concat.txt");
        let mut listing = String::new();
        for input in inputs {
            listing.push_str(&format!("file '{}'\n", input.display()));
        }
        let mut file =
            tokio::fs::File::create(&list_path)
                .await
                .map_err(|source| MediaToolError::Io {
                    path: list_path.clone(),
                    source,
                })?;
        file.write_all(listing.as_bytes())
            .await
            .map_err(|source| MediaToolError::Io {
                path: list_path.clone(),
                source,
            })?;
        drop(file);

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-v")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(&list_path)
            .arg("-c")
            .arg("copy")
            .arg(dest);
        let output = self.run(&mut command).await;
        let _ = tokio::fs::remove_file(&list_path).await;
        let output = output?;
        if !output.status.success() {
            return Err(MediaToolError::Concat {
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn open_frame_pipe(&self, source: &Path) -> MediaResult<FramePipe> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(source)
            .arg("-f")
            .arg("image2pipe")
            .arg("-vcodec")
            .arg("mjpeg")
            .arg("-q:v")
            .arg("4")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| MediaToolError::Spawn {
            tool: self.ffmpeg.to_string_lossy().to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| MediaToolError::Decode {
            path: source.to_path_buf(),
            detail: "decoder stdout was not captured".to_string(),
        })?;
        Ok(FramePipe::from_child(child, stdout, source.to_path_buf()))
    }
}

/// A running frame decode. Dropping the pipe kills the decoder process.
pub struct FramePipe {
    child: Option<Child>,
    scanner: FrameScanner<Box<dyn AsyncRead + Send + Unpin>>,
}

impl FramePipe {
    fn from_child(child: Child, stdout: ChildStdout, source: PathBuf) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(BufReader::new(stdout));
        Self {
            child: Some(child),
            scanner: FrameScanner::with_source(reader, source),
        }
    }

    /// Build a pipe over an arbitrary byte source. Used by in-process
    /// decoders and tests.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            child: None,
            scanner: FrameScanner::new(reader),
        }
    }

    /// Next encoded frame, or `None` once the decoder is exhausted.
    pub async fn next_frame(&mut self) -> MediaResult<Option<Vec<u8>>> {
        let frame = self.scanner.next_frame().await?;
        if frame.is_none() {
            // Reap the decoder on normal exhaustion.
            if let Some(mut child) = self.child.take() {
                let _ = child.wait().await;
            }
        }
        Ok(frame)
    }
}

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Splits a concatenated MJPEG byte stream into individual JPEG frames.
pub struct FrameScanner<R> {
    reader: R,
    buf: Vec<u8>,
    scanned: usize,
    source: PathBuf,
}

impl<R: AsyncRead + Unpin> FrameScanner<R> {
    pub fn new(reader: R) -> Self {
        Self::with_source(reader, PathBuf::from("<stream>"))
    }

    fn with_source(reader: R, source: PathBuf) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            scanned: 0,
            source,
        }
    }

    pub async fn next_frame(&mut self) -> MediaResult<Option<Vec<u8>>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(end) = find_marker(&self.buf, &JPEG_EOI, self.scanned.saturating_sub(1)) {
                let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
                self.scanned = 0;
                match find_marker(&raw, &JPEG_SOI, 0) {
                    Some(start) => return Ok(Some(raw[start..].to_vec())),
                    // Bytes before the first start marker are decoder
                    // preamble; skip and keep scanning.
                    None => continue,
                }
            }
            self.scanned = self.buf.len();
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|source| MediaToolError::Io {
                    path: self.source.clone(),
                    source,
                })?;
            if read == 0 {
                // Trailing bytes without an end marker are a truncated
                // frame; the stream is done.
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < 2 {
        return None;
    }
    (from..haystack.len() - 1).find(|&i| haystack[i] == marker[0] && haystack[i + 1] == marker[1])
}
