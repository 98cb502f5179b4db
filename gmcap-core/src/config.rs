use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration for the capture pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GmcapConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub recording: RecordingSection,
    pub segmenter: SegmenterSection,
    pub sync: SyncSection,
    pub space: SpaceSection,
}

impl GmcapConfig {
    /// Resolve a possibly relative path against `paths.base_dir`.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.staging_dir)
    }

    pub fn clips_cache_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.clips_cache_dir)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.scratch_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.remote_dir)
    }

    pub fn watcher_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recording.watcher_poll_ms)
    }

    pub fn watcher_settle(&self) -> Duration {
        Duration::from_millis(self.recording.watcher_settle_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub staging_dir: String,
    pub clips_cache_dir: String,
    pub scratch_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
    /// Root exposed by the filesystem store adapter. Cloud adapters are
    /// wired in by the embedding service and ignore this.
    pub remote_dir: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSection {
    pub session_prefix: String,
    pub clip_extension: String,
    pub watcher_poll_ms: u64,
    pub watcher_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmenterSection {
    pub clip_duration_seconds: f64,
    pub tail_threshold_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceSection {
    pub total_gb: f64,
}

pub fn load_gmcap_config<P: AsRef<Path>>(path: P) -> ConfigResult<GmcapConfig> {
    load_toml(path.as_ref())
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_config() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("configs")
            .join("gmcap.toml")
    }

    #[test]
    fn loads_workspace_config() {
        let config = load_gmcap_config(workspace_config()).unwrap();
        assert_eq!(config.recording.session_prefix, "Data");
        assert_eq!(config.sync.interval_seconds, 5);
        assert!(config.segmenter.clip_duration_seconds > 0.0);
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let config = load_gmcap_config(workspace_config()).unwrap();
        let staging = config.staging_dir();
        assert!(staging.starts_with(&config.paths.base_dir));
        assert!(staging.ends_with("staging"));
    }

    #[test]
    fn absolute_paths_pass_through() {
        let config = load_gmcap_config(workspace_config()).unwrap();
        assert_eq!(
            config.resolve_path("/tmp/elsewhere"),
            PathBuf::from("/tmp/elsewhere")
        );
    }
}
