use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long output is still collected after the child is gone. Background
/// processes it started may keep the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyOutcome {
    pub success: bool,
    /// stderr (or stdout when stderr is empty) on failure, stdout on success.
    pub output: String,
    pub timed_out: bool,
}

impl VerifyOutcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            timed_out: false,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            timed_out: false,
        }
    }
}

/// Runs an edited file to check that it still works. A timeout or a
/// spawn failure is a failed outcome, never an error.
pub trait Verifier {
    fn verify(&self, path: &Path) -> VerifyOutcome;
}

/// Executes the file as a standalone program under a hard wall-clock limit.
pub struct ProcessVerifier {
    program: String,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessVerifier {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            workdir: None,
            timeout,
        }
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

impl Verifier for ProcessVerifier {
    fn verify(&self, path: &Path) -> VerifyOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return VerifyOutcome::failed(format!("failed to run {}: {err}", self.program));
            }
        };

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        let status = wait_with_timeout(&mut child, self.timeout);
        let drain_until = Instant::now() + DRAIN_GRACE;
        let stdout = stdout.map(|rx| drain(rx, drain_until)).unwrap_or_default();
        let stderr = stderr.map(|rx| drain(rx, drain_until)).unwrap_or_default();

        match status {
            Some(status) if status.success() => VerifyOutcome::passed(stdout),
            Some(status) => {
                debug!(path = %path.display(), ?status, "verification failed");
                let output = if stderr.trim().is_empty() { stdout } else { stderr };
                VerifyOutcome::failed(output)
            }
            None => VerifyOutcome {
                success: false,
                output: format!(
                    "Timeout: execution took longer than {}s",
                    self.timeout.as_secs_f64()
                ),
                timed_out: true,
            },
        }
    }
}

/// Forwards chunks read from `source` until EOF or a read error.
fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Everything received before EOF or `until`, whichever comes first. A
/// reader still blocked at the deadline is abandoned.
fn drain(rx: Receiver<Vec<u8>>, until: Instant) -> String {
    let mut out = Vec::new();
    loop {
        let left = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => out.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => {
                debug!("output still open after exit; dropping the rest");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `None` when the deadline passed; the child is killed and reaped.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => break,
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    let _ = child.wait();
    None
}
