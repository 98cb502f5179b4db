pub mod archive;
pub mod config;
pub mod ledger;
pub mod media;
pub mod player;
pub mod recorder;
pub mod segmenter;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod sync;
pub mod watcher;

pub use archive::{ArchiveError, ArchiveResult, SessionArchive};
pub use config::{
    load_gmcap_config, ConfigError, GmcapConfig, PathsSection, RecordingSection, SegmenterSection,
    SpaceSection, SyncSection, SystemSection,
};
pub use ledger::{LedgerError, LedgerResult, SessionLedger};
pub use media::{FfmpegTool, FramePipe, MediaResult, MediaTool, MediaToolError};
pub use player::{
    FrameStream, FrameTransform, Player, PlayerError, PlayerResult, StitchedClip,
};
pub use recorder::{ClipAck, RecorderError, RecorderResult, RecordingSessionManager};
pub use segmenter::{Segmenter, SegmenterError, SegmenterResult};
pub use sequencer::FolderSequencer;
pub use session::{
    ClipDescriptor, PatientInfo, RecordingSession, RemoteSession, SessionRecord, SessionRegistry,
    SourceSpan, UploadState, VerificationStatus,
};
pub use store::{
    ChildFilter, DriveSpace, FileId, FolderId, FsRemoteStore, RemoteEntry, RemoteStore,
    SpaceTracker, StoreError, StoreResult,
};
pub use sync::{ReconciliationSync, SyncError, SyncResult};
pub use watcher::AutoUploadWatcher;
