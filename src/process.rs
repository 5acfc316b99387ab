//! Isolated scanner process supervision
//!
//! One native probe runs in one short-lived child process, so a hanging or
//! crashing plugin can never take the host down with it. The supervisor
//! polls the child every 100 ms and keeps a countdown in deciseconds; the
//! countdown can be disabled and re-enabled while the child runs (re-seeding
//! on re-enable rather than killing), and two cancellation granularities are
//! honoured: the current candidate only, or the whole discovery pass.
//!
//! The child communicates only through its exit status and the cache file it
//! was asked to produce. Whatever it prints is captured and folded into the
//! scan log trail, success or not.

use crossbeam::channel::{unbounded, Sender};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::scan_log::ScanLogEntry;
use crate::types::{Candidate, PluginFormat, ScanError, ScanResult};

/// Poll interval: one decisecond
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct CancelInner {
    cancel_all: AtomicBool,
    cancel_one: AtomicBool,
    timeout_disabled: AtomicBool,
}

/// Cooperative cancellation and timeout control
///
/// Cloned into whoever needs to signal (GUI thread, signal handler) and
/// polled by the supervision loop at 100 ms granularity.
#[derive(Clone, Debug, Default)]
pub struct CancelControl {
    inner: Arc<CancelInner>,
}

impl CancelControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the in-flight candidate and every remaining discoverer
    pub fn cancel_all(&self) {
        self.inner.cancel_all.store(true, Ordering::SeqCst);
    }

    /// Abort only the in-flight candidate; the pass continues
    pub fn cancel_one(&self) {
        self.inner.cancel_one.store(true, Ordering::SeqCst);
    }

    /// Suspend or resume timeout enforcement for in-flight and future scans
    pub fn set_timeout_disabled(&self, disabled: bool) {
        self.inner.timeout_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn timeout_disabled(&self) -> bool {
        self.inner.timeout_disabled.load(Ordering::SeqCst)
    }

    /// Whether the whole pass was cancelled
    pub fn all_cancelled(&self) -> bool {
        self.inner.cancel_all.load(Ordering::SeqCst)
    }

    /// Whether the current candidate should be aborted
    pub fn cancelled(&self) -> bool {
        self.all_cancelled() || self.inner.cancel_one.load(Ordering::SeqCst)
    }

    /// Clear everything at the start of a refresh pass
    pub fn reset_pass(&self) {
        self.inner.cancel_all.store(false, Ordering::SeqCst);
        self.inner.cancel_one.store(false, Ordering::SeqCst);
    }

    /// Clear the single-candidate flag before the next candidate
    pub fn reset_one(&self) {
        self.inner.cancel_one.store(false, Ordering::SeqCst);
    }
}

/// One scanner child invocation
#[derive(Debug)]
pub struct ScannerLaunch<'a> {
    pub bin: &'a Path,
    pub format: PluginFormat,
    pub candidate: &'a Candidate,
    /// Cache directory the child must write into (exported as
    /// `POLARON_CACHE_DIR`)
    pub cache_dir: &'a Path,
    /// Countdown seed in deciseconds; zero or negative disables the timeout
    pub timeout_ds: i64,
    pub verbose: bool,
}

/// Run the scanner child for one candidate and wait for it, bounded by the
/// countdown and the cancellation flags.
///
/// Success means only that the child exited cleanly; the caller still has to
/// confirm the cache file before trusting the scan (and before removing the
/// candidate from the blacklist).
pub fn run_scanner(
    launch: &ScannerLaunch<'_>,
    cancel: &CancelControl,
    entry: &mut ScanLogEntry,
) -> ScanResult<()> {
    if !launch.bin.is_file() {
        return Err(ScanError::MissingScanner(launch.bin.to_path_buf()));
    }

    let mut cmd = Command::new(launch.bin);
    cmd.arg("-f").arg(launch.format.as_str());
    if launch.verbose {
        cmd.arg("-v");
    }
    cmd.arg(launch.candidate.id_string());
    cmd.env("POLARON_CACHE_DIR", launch.cache_dir);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(
        "launching scanner {} for {} candidate {}",
        launch.bin.display(),
        launch.format,
        launch.candidate
    );

    let mut child = cmd.spawn().map_err(|e| {
        ScanError::Scanner(format!("cannot launch {}: {}", launch.bin.display(), e))
    })?;

    // capture both pipes off-thread so a chatty child can never block on a
    // full pipe buffer
    let (tx, rx) = unbounded::<String>();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx.clone());
    }
    drop(tx);

    let no_timeout_cfg = launch.timeout_ds <= 0;
    let mut countdown = launch.timeout_ds;
    let mut enforcing = !no_timeout_cfg && !cancel.timeout_disabled();

    let verdict = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    break Ok(());
                }
                break Err(ScanError::Scanner(format!(
                    "scanner exited with {}",
                    status
                )));
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                break Err(ScanError::Io(e));
            }
        }

        if cancel.cancelled() {
            info!("scan of {} cancelled, terminating scanner", launch.candidate);
            let _ = child.kill();
            let _ = child.wait();
            break Err(ScanError::Cancelled);
        }

        // the operator can flip enforcement while the child runs; coming
        // back from "disabled" re-seeds the countdown instead of killing
        let now_enforcing = !no_timeout_cfg && !cancel.timeout_disabled();
        if now_enforcing && !enforcing {
            countdown = launch.timeout_ds;
        }
        enforcing = now_enforcing;

        if enforcing {
            countdown -= 1;
            if countdown <= 0 {
                warn!(
                    "scanner for {} exceeded {} ds timeout, terminating",
                    launch.candidate, launch.timeout_ds
                );
                let _ = child.kill();
                let _ = child.wait();
                break Err(ScanError::TimedOut);
            }
        }

        thread::sleep(POLL_INTERVAL);
    };

    // drain captured output; an orphaned grandchild holding the pipe open
    // must not stall the supervisor, so idle for half a second at most
    while let Ok(line) = rx.recv_timeout(Duration::from_millis(500)) {
        if launch.verbose {
            info!("scanner: {}", line);
        }
        entry.note(format!("scanner: {}", line));
    }

    verdict
}

fn spawn_reader(pipe: impl std::io::Read + Send + 'static, sink: Sender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(Result::ok) {
            if sink.send(line).is_err() {
                break;
            }
        }
    });
}
