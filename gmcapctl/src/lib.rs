use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Runtime;

use gmcap_core::{
    load_gmcap_config, AutoUploadWatcher, FfmpegTool, FolderSequencer, FsRemoteStore, GmcapConfig,
    Player, ReconciliationSync, Segmenter, SessionArchive, SessionLedger, SessionRecord,
    VerificationStatus,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] gmcap_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger error: {0}")]
    Ledger(#[from] gmcap_core::LedgerError),
    #[error("archive error: {0}")]
    Archive(#[from] gmcap_core::ArchiveError),
    #[error("segmenter error: {0}")]
    Segmenter(#[from] gmcap_core::SegmenterError),
    #[error("player error: {0}")]
    Player(#[from] gmcap_core::PlayerError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid verification status: {0}")]
    InvalidStatus(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "GMCAP capture pipeline control interface", long_about = None)]
pub struct Cli {
    /// Path to the main gmcap.toml
    #[arg(long, default_value = "configs/gmcap.toml")]
    pub config: PathBuf,
    /// Override for paths.staging_dir
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,
    /// Override for paths.clips_cache_dir
    #[arg(long)]
    pub clips_cache_dir: Option<PathBuf>,
    /// Override for paths.scratch_dir
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Override for paths.remote_dir
    #[arg(long)]
    pub remote_dir: Option<PathBuf>,
    /// Alternative path to sessions.sqlite
    #[arg(long)]
    pub ledger_db: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a summary of the local pipeline state
    Status,
    /// Session ledger operations
    #[command(subcommand)]
    Sessions(SessionCommands),
    /// Cut a source video into fixed-duration clips
    Segment(SegmentArgs),
    /// Stitch a session's cached clips into one video
    Stitch(StitchArgs),
    /// Record a verification decision on a remote session
    Verify(VerifyArgs),
    /// Download a session's clips into the local cache
    Download(DownloadArgs),
    /// Run one reconciliation pass against the remote store
    Reconcile,
    /// Run the auto-upload watcher and reconciliation loops
    Ingest,
    /// Print the next session folder name
    #[command(name = "next-name")]
    NextName,
    /// Run basic integrity checks
    #[command(name = "health")]
    Health,
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List sessions recorded in the local ledger
    List(SessionListArgs),
}

#[derive(Args, Debug)]
pub struct SessionListArgs {
    /// Filter by verification status
    #[arg(long)]
    pub status: Option<String>,
    /// Maximum number of rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// Source video file
    pub source: PathBuf,
    /// Clip length in seconds (defaults to the configured value)
    #[arg(long)]
    pub clip_seconds: Option<f64>,
}

#[derive(Args, Debug)]
pub struct StitchArgs {
    /// Session whose cached clips are stitched
    pub session: String,
    /// Destination file for the stitched video
    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Remote session folder name
    pub session: String,
    /// New status: pending, approved or rejected
    pub status: String,
    /// Free-text reason stored alongside the status
    #[arg(long, default_value = "")]
    pub reason: String,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Remote session folder name
    pub session: String,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "gmcapctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    let runtime = Runtime::new()?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Sessions(SessionCommands::List(args)) => {
            let sessions = context.sessions_list(args)?;
            render(&sessions, cli.format)?;
        }
        Commands::Segment(args) => {
            let report = runtime.block_on(context.segment(args))?;
            render(&report, cli.format)?;
        }
        Commands::Stitch(args) => {
            let report = runtime.block_on(context.stitch(args))?;
            render(&report, cli.format)?;
        }
        Commands::Verify(args) => {
            let report = runtime.block_on(context.verify(args))?;
            render(&report, cli.format)?;
        }
        Commands::Download(args) => {
            let report = runtime.block_on(context.download(args))?;
            render(&report, cli.format)?;
        }
        Commands::Reconcile => {
            let report = runtime.block_on(context.reconcile())?;
            render(&report, cli.format)?;
        }
        Commands::Ingest => {
            runtime.block_on(context.ingest())?;
        }
        Commands::NextName => {
            let report = runtime.block_on(context.next_name());
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Completions(_) => unreachable!("handled above"),
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: GmcapConfig,
    config_path: PathBuf,
    staging_dir: PathBuf,
    clips_cache_dir: PathBuf,
    scratch_dir: PathBuf,
    remote_dir: PathBuf,
    ledger_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_gmcap_config(&config_path)?;

        let staging_dir = cli.staging_dir.clone().unwrap_or_else(|| config.staging_dir());
        let clips_cache_dir = cli
            .clips_cache_dir
            .clone()
            .unwrap_or_else(|| config.clips_cache_dir());
        let scratch_dir = cli.scratch_dir.clone().unwrap_or_else(|| config.scratch_dir());
        let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());
        let remote_dir = cli.remote_dir.clone().unwrap_or_else(|| config.remote_dir());
        let ledger_db = cli
            .ledger_db
            .clone()
            .unwrap_or_else(|| data_dir.join("sessions.sqlite"));

        Ok(Self {
            config,
            config_path,
            staging_dir,
            clips_cache_dir,
            scratch_dir,
            remote_dir,
            ledger_db,
        })
    }

    fn ledger(&self) -> SessionLedger {
        SessionLedger::new(&self.ledger_db)
    }

    fn store(&self) -> Arc<FsRemoteStore> {
        Arc::new(FsRemoteStore::new(&self.remote_dir))
    }

    fn archive(&self) -> Arc<SessionArchive> {
        Arc::new(SessionArchive::new(
            self.store(),
            self.config.space.total_gb,
            &self.clips_cache_dir,
            &self.config.recording.session_prefix,
        ))
    }

    fn tool(&self) -> Arc<FfmpegTool> {
        Arc::new(FfmpegTool::new(
            &self.config.paths.ffmpeg,
            &self.config.paths.ffprobe,
        ))
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let ledger_counts = if self.ledger_db.exists() {
            self.ledger()
                .counts_by_status()?
                .into_iter()
                .collect::<BTreeMap<String, i64>>()
        } else {
            BTreeMap::new()
        };

        let staged_sessions = match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries
                .filter_map(std::result::Result::ok)
                .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .count(),
            Err(_) => 0,
        };

        Ok(StatusReport {
            node_name: self.config.system.node_name.clone(),
            environment: self.config.system.environment.clone(),
            ledger_counts,
            staged_sessions,
            space_total_gb: self.config.space.total_gb,
        })
    }

    fn sessions_list(&self, args: &SessionListArgs) -> Result<SessionList> {
        let ledger = self.ledger();
        ledger.initialize()?;
        let mut rows = ledger.list(args.limit)?;
        if let Some(status) = &args.status {
            let wanted: VerificationStatus = status
                .parse()
                .map_err(|_| AppError::InvalidStatus(status.clone()))?;
            rows.retain(|row| row.status == wanted);
        }
        Ok(SessionList { rows })
    }

    async fn segment(&self, args: &SegmentArgs) -> Result<SegmentReport> {
        let segmenter = Segmenter::new(self.tool(), &self.clips_cache_dir)
            .with_tail_threshold(self.config.segmenter.tail_threshold_seconds);
        let clip_seconds = args
            .clip_seconds
            .unwrap_or(self.config.segmenter.clip_duration_seconds);
        let clips = segmenter.segment(&args.source, clip_seconds).await?;
        Ok(SegmentReport {
            source: args.source.display().to_string(),
            clip_seconds,
            clips: clips
                .iter()
                .map(|clip| clip.display().to_string())
                .collect(),
        })
    }

    async fn stitch(&self, args: &StitchArgs) -> Result<StitchReport> {
        let dir = self.clips_cache_dir.join(&args.session);
        let mut clips: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|_| {
                AppError::MissingResource(format!("no cached clips under {}", dir.display()))
            })?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        clips.sort();
        if clips.is_empty() {
            return Err(AppError::MissingResource(format!(
                "no cached clips under {}",
                dir.display()
            )));
        }

        let player = Player::new(self.tool(), &self.scratch_dir);
        let stitched = player.stitch(&clips).await?;
        // The scratch artifact deletes itself on drop; persist a copy.
        std::fs::copy(stitched.path(), &args.output)?;
        Ok(StitchReport {
            session: args.session.clone(),
            clips: clips.len(),
            output: args.output.display().to_string(),
        })
    }

    async fn verify(&self, args: &VerifyArgs) -> Result<VerifyReport> {
        let status: VerificationStatus = args
            .status
            .parse()
            .map_err(|_| AppError::InvalidStatus(args.status.clone()))?;
        self.archive()
            .update_verification(&args.session, status, &args.reason, Some(Utc::now()))
            .await?;
        Ok(VerifyReport {
            session: args.session.clone(),
            status: status.to_string(),
        })
    }

    async fn download(&self, args: &DownloadArgs) -> Result<DownloadReport> {
        let dir = self.archive().download_clips(&args.session).await?;
        Ok(DownloadReport {
            session: args.session.clone(),
            dir: dir.display().to_string(),
        })
    }

    async fn reconcile(&self) -> Result<ReconcileReport> {
        let ledger = self.ledger();
        ledger.initialize()?;
        let sync = ReconciliationSync::new(
            self.archive(),
            ledger,
            self.config.sync_interval(),
        );
        let appended = sync.run_once().await.map_err(|err| match err {
            gmcap_core::SyncError::Archive(err) => AppError::Archive(err),
            gmcap_core::SyncError::Ledger(err) => AppError::Ledger(err),
        })?;
        Ok(ReconcileReport { appended })
    }

    async fn ingest(&self) -> Result<()> {
        let ledger = self.ledger();
        ledger.initialize()?;
        let archive = self.archive();
        let watcher = AutoUploadWatcher::new(
            &self.staging_dir,
            archive.clone(),
            self.config.watcher_poll_interval(),
            self.config.watcher_settle(),
        );
        let sync = ReconciliationSync::new(archive, ledger, self.config.sync_interval());

        tokio::select! {
            _ = watcher.run() => {}
            _ = sync.run() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        Ok(())
    }

    async fn next_name(&self) -> NextNameReport {
        let sequencer = FolderSequencer::new(self.store(), &self.staging_dir);
        NextNameReport {
            name: sequencer
                .next_name(&self.config.recording.session_prefix)
                .await,
        }
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(self.check_path("gmcap.toml", &self.config_path));
        results.push(self.check_path("ffmpeg", Path::new(&self.config.paths.ffmpeg)));
        results.push(self.check_path("ffprobe", Path::new(&self.config.paths.ffprobe)));
        results.push(self.check_directory("staging", &self.staging_dir));
        results.push(self.check_directory("clips_cache", &self.clips_cache_dir));
        results.push(self.check_directory("remote", &self.remote_dir));
        results.push(self.check_database("sessions.sqlite", &self.ledger_db));
        results
    }

    fn check_path(&self, name: &str, path: &Path) -> HealthEntry {
        if path.exists() {
            HealthEntry::ok(name, format!("{}", path.display()))
        } else {
            HealthEntry::error(name, format!("{} missing", path.display()))
        }
    }

    fn check_directory(&self, name: &str, path: &Path) -> HealthEntry {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
            Ok(_) => HealthEntry::warn(name, format!("{} is not a directory", path.display())),
            Err(_) => HealthEntry::warn(name, format!("{} not found", path.display())),
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{} not found", path.display()));
        }
        match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.to_lowercase() == "ok" => {
                        HealthEntry::ok(name, "integrity ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("error: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("failed to open: {err}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node_name: String,
    pub environment: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ledger_counts: BTreeMap<String, i64>,
    pub staged_sessions: usize,
    pub space_total_gb: f64,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Node: {} (env: {})",
            self.node_name, self.environment
        )];
        if self.ledger_counts.is_empty() {
            lines.push("Ledger: empty".to_string());
        } else {
            lines.push("Ledger:".to_string());
            for (status, count) in &self.ledger_counts {
                lines.push(format!("  - {status}: {count}"));
            }
        }
        lines.push(format!("Staged sessions: {}", self.staged_sessions));
        lines.push(format!("Remote capacity: {:.1} GB", self.space_total_gb));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub rows: Vec<SessionRecord>,
}

impl DisplayFallback for SessionList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No sessions recorded".to_string();
        }
        let mut lines = Vec::new();
        for row in &self.rows {
            let created = row
                .created_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            let comment = if row.comment.is_empty() {
                "-".to_string()
            } else {
                row.comment.clone()
            };
            lines.push(format!(
                "{} | status={} | comment={} | created={}",
                row.folder_name, row.status, comment, created
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SegmentReport {
    pub source: String,
    pub clip_seconds: f64,
    pub clips: Vec<String>,
}

impl DisplayFallback for SegmentReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Segmented {} into {} clips of {:.1}s",
            self.source,
            self.clips.len(),
            self.clip_seconds
        )];
        for clip in &self.clips {
            lines.push(format!("  - {clip}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StitchReport {
    pub session: String,
    pub clips: usize,
    pub output: String,
}

impl DisplayFallback for StitchReport {
    fn display(&self) -> String {
        format!(
            "Stitched {} clips of {} into {}",
            self.clips, self.session, self.output
        )
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub session: String,
    pub status: String,
}

impl DisplayFallback for VerifyReport {
    fn display(&self) -> String {
        format!("{}: status set to {}", self.session, self.status)
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadReport {
    pub session: String,
    pub dir: String,
}

impl DisplayFallback for DownloadReport {
    fn display(&self) -> String {
        format!("Clips of {} available under {}", self.session, self.dir)
    }
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub appended: usize,
}

impl DisplayFallback for ReconcileReport {
    fn display(&self) -> String {
        match self.appended {
            0 => "Ledger already up to date".to_string(),
            n => format!("Appended {n} remote sessions to the ledger"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NextNameReport {
    pub name: String,
}

impl DisplayFallback for NextNameReport {
    fn display(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}
