//! A single live transcoding session.
//!
//! A [`Session`] owns one ffmpeg process and its working directory
//! (`<tmp_dir>/<id>`), which holds the HLS manifest, the segments and the
//! transcoder's stderr log.
//!
//! Lifecycle: `created → starting → running → failed | terminated`. A session
//! whose process exits successfully stays `running` so its finished output
//! keeps being served until it is stopped or reclaimed.

use super::error::StreamError;
use chrono::{DateTime, Utc};
use kino_av::plan::MANIFEST_NAME;
use kino_common::{Profile, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Transcoder stderr is captured here for failure diagnostics.
pub const LOG_NAME: &str = "transcode.log";

/// Lines of the transcoder log reported when a session fails.
const FAILURE_LOG_LINES: usize = 20;

/// Manifest tag introducing a segment entry.
const SEGMENT_TAG: &[u8] = b"#EXTINF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Starting,
    Running,
    Failed,
    Terminated,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// What a client asked to play.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Absolute path, already confined to the media root.
    pub source: PathBuf,
    pub profile: Profile,
    pub audio_index: Option<u32>,
    pub subtitle_index: Option<u32>,
    /// Requested seek offset in seconds.
    pub start: f64,
}

#[derive(Default)]
struct Process {
    child: Option<Child>,
    exit: Option<ExitStatus>,
}

pub struct Session {
    id: SessionId,
    params: SessionParams,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    kill_grace: Duration,
    resolved_start: Mutex<Option<f64>>,
    last_access: Mutex<Instant>,
    status: Mutex<SessionStatus>,
    process: Mutex<Process>,
    /// Manifest offset from which the next segment scan resumes.
    manifest_scanned: Mutex<u64>,
    segments_seen: AtomicBool,
    killed: AtomicBool,
}

/// Snapshot of a session for the sessions listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub source: PathBuf,
    pub profile: String,
    pub status: SessionStatus,
    pub has_segments: bool,
    pub idle_secs: u64,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Create a session whose working directory will live under `tmp_dir`.
    ///
    /// Nothing touches the filesystem until [`Session::start`].
    pub fn new(params: SessionParams, tmp_dir: &Path, kill_grace: Duration) -> Self {
        let id = SessionId::new();
        Self {
            id,
            dir: tmp_dir.join(id.to_string()),
            params,
            started_at: Utc::now(),
            kill_grace,
            resolved_start: Mutex::new(None),
            last_access: Mutex::new(Instant::now()),
            status: Mutex::new(SessionStatus::Created),
            process: Mutex::new(Process::default()),
            manifest_scanned: Mutex::new(0),
            segments_seen: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.params.source
    }

    pub fn profile(&self) -> &Profile {
        &self.params.profile
    }

    pub fn audio_index(&self) -> Option<u32> {
        self.params.audio_index
    }

    pub fn subtitle_index(&self) -> Option<u32> {
        self.params.subtitle_index
    }

    pub fn requested_start(&self) -> f64 {
        self.params.start
    }

    /// Keyframe-aligned start, once resolved.
    pub fn resolved_start(&self) -> Option<f64> {
        *self.resolved_start.lock()
    }

    pub fn set_resolved_start(&self, start: f64) {
        *self.resolved_start.lock() = Some(start);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_NAME)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: SessionStatus) {
        let mut current = self.status.lock();
        if *current != SessionStatus::Terminated {
            *current = status;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Record a client read.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Time since the last client read.
    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Spawn the transcoder.
    ///
    /// Creates the working directory, sends the process's stderr to
    /// [`LOG_NAME`] and runs it in its own process group with the working
    /// directory as cwd. On error the session is `failed`; its directory is
    /// left for [`Session::kill`] to remove.
    pub async fn start(&self, program: &Path, args: &[String]) -> Result<(), StreamError> {
        self.set_status(SessionStatus::Starting);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.launch_failed(format!("cannot create {:?}: {}", self.dir, e)))?;

        let log = tokio::fs::File::create(self.log_path())
            .await
            .map_err(|e| self.launch_failed(format!("cannot create transcoder log: {}", e)))?
            .into_std()
            .await;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| self.launch_failed(format!("{}: {}", program.display(), e)))?;
        let pid = child.id();

        // A stop that raced the launch owns teardown of everything but this
        // child, which it never saw.
        let orphan = {
            let mut process = self.process.lock();
            if self.killed.load(Ordering::SeqCst) {
                Some(child)
            } else {
                process.child = Some(child);
                None
            }
        };

        if let Some(child) = orphan {
            terminate(child, self.kill_grace).await;
            remove_dir(&self.dir).await;
            return Err(StreamError::LaunchFailed(
                "session stopped during launch".to_string(),
            ));
        }

        self.set_status(SessionStatus::Running);
        tracing::info!(
            session_id = %self.id,
            pid = ?pid,
            profile = %self.params.profile,
            source = %self.params.source.display(),
            start = self.params.start,
            "Transcoder started"
        );
        Ok(())
    }

    fn launch_failed(&self, message: String) -> StreamError {
        self.set_status(SessionStatus::Failed);
        StreamError::LaunchFailed(message)
    }

    /// Exit status of the transcoder, if it has exited.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut guard = self.process.lock();
        let process = &mut *guard;
        if process.exit.is_none() {
            if let Some(child) = process.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(session_id = %self.id, %status, "Transcoder exited");
                        process.exit = Some(status);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(session_id = %self.id, error = %e, "Failed to poll transcoder");
                    }
                }
            }
        }
        process.exit
    }

    /// Whether the manifest lists at least one segment.
    ///
    /// Latched: once true it stays true. Each call only reads what the
    /// transcoder appended since the previous one.
    pub fn has_segments(&self) -> bool {
        if self.segments_seen.load(Ordering::SeqCst) {
            return true;
        }

        let mut scanned = self.manifest_scanned.lock();
        let found = match scan_manifest(&self.manifest_path(), *scanned) {
            Ok(scan) => {
                *scanned = scan.resume_at;
                scan.found
            }
            Err(_) => false,
        };
        if found {
            self.segments_seen.store(true, Ordering::SeqCst);
        }
        found
    }

    /// Exited with an error without ever producing a segment.
    ///
    /// A non-zero exit after some output is treated as a truncated but usable
    /// stream.
    pub fn has_failed(&self) -> bool {
        let exited_badly = matches!(self.exit_status(), Some(status) if !status.success());
        let failed = exited_badly && !self.has_segments();
        if failed {
            self.set_status(SessionStatus::Failed);
        }
        failed
    }

    /// Last lines of the transcoder's stderr.
    pub async fn failure_log(&self) -> String {
        let log = tokio::fs::read_to_string(self.log_path())
            .await
            .unwrap_or_default();
        let lines: Vec<&str> = log.lines().collect();
        let tail = lines.len().saturating_sub(FAILURE_LOG_LINES);
        lines[tail..].join("\n")
    }

    /// Stop the transcoder and delete the working directory.
    ///
    /// Sends SIGTERM to the process group, escalates to SIGKILL after the
    /// grace period, then removes the directory. Only the first call does
    /// anything; it returns `true`, every other call returns `false`.
    pub async fn kill(&self) -> bool {
        let child = {
            let mut process = self.process.lock();
            if self.killed.swap(true, Ordering::SeqCst) {
                return false;
            }
            process.child.take()
        };
        *self.status.lock() = SessionStatus::Terminated;

        if let Some(child) = child {
            terminate(child, self.kill_grace).await;
        }
        remove_dir(&self.dir).await;

        tracing::info!(session_id = %self.id, "Session terminated");
        true
    }

    /// [`Session::kill`] on a task of its own.
    ///
    /// Teardown runs to completion even if the caller's future is dropped
    /// while waiting for it.
    pub async fn kill_detached(self: Arc<Self>) -> bool {
        let id = self.id;
        match tokio::spawn(async move { self.kill().await }).await {
            Ok(killed) => killed,
            Err(e) => {
                tracing::error!(session_id = %id, error = %e, "Session teardown task failed");
                false
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            source: self.params.source.clone(),
            profile: self.params.profile.name.clone(),
            status: self.status(),
            has_segments: self.has_segments(),
            idle_secs: self.idle_for().as_secs(),
            started_at: self.started_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.params.source)
            .field("profile", &self.params.profile.name)
            .field("status", &self.status())
            .finish()
    }
}

struct ManifestScan {
    found: bool,
    /// Start of the last incomplete line, which is read again next time.
    resume_at: u64,
}

/// Look for a segment entry in the manifest from byte `from` onwards.
fn scan_manifest(path: &Path, from: u64) -> std::io::Result<ManifestScan> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    // Shorter than what was already scanned: the file was replaced
    let from = if len < from { 0 } else { from };

    file.seek(SeekFrom::Start(from))?;
    let mut appended = Vec::new();
    file.take(len - from).read_to_end(&mut appended)?;

    let found = appended
        .split(|b| *b == b'\n')
        .any(|line| line.starts_with(SEGMENT_TAG));
    let complete = appended
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);

    Ok(ManifestScan {
        found,
        resume_at: from + complete as u64,
    })
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(mut child: Child, grace: Duration) {
    request_stop(&mut child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "Transcoder stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed waiting for transcoder"),
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Transcoder ignored SIGTERM, killing"
            );
            force_stop(&mut child);
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill transcoder");
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            tracing::debug!(pid, error = %e, "Failed to signal process group");
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn force_stop(child: &mut Child) {
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn force_stop(_child: &mut Child) {}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = ?dir, error = %e, "Failed to remove session directory"),
    }
}
