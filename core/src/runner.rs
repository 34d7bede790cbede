//! Bounded execution of the tunnel CLI.
//! Output is captured on reader threads while the child is polled against a deadline.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::platform::CommandRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to keep reading output once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured result of a finished CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("process did not finish within {0:?}")]
    Timeout(Duration),
    #[error("failed to start process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed while waiting for process: {0}")]
    Io(#[source] std::io::Error),
}

/// Runs the configured CLI binary with `std::process`.
pub struct SystemRunner {
    program: String,
    path: String,
}

impl SystemRunner {
    pub fn new(program: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            path: path.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, RunError> {
        debug!("Running {} {:?} (timeout {:?})", self.program, args, timeout);

        let mut child = Command::new(&self.program)
            .args(args)
            .env("PATH", &self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(RunError::Spawn)?;

        let stdout_rx = child.stdout.take().map(spawn_reader);
        let stderr_rx = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now().checked_add(timeout);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        warn!(
                            "{} {:?} exceeded {:?}, killing it",
                            self.program, args, timeout
                        );
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(RunError::Timeout(timeout));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(RunError::Io(e));
                }
            }
        };

        // A daemon forked by the CLI may keep the pipes open, so only drain briefly.
        let drain_until = Instant::now() + DRAIN_GRACE;
        let stdout = collect(stdout_rx, drain_until);
        let stderr = collect(stderr_rx, drain_until);

        debug!("{} {:?} exited with {:?}", self.program, args, status.code());
        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Streams the pipe in chunks, so output written before a daemon detaches is not lost.
/// The thread ends when every holder of the pipe has closed it.
fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
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

fn collect(rx: Option<mpsc::Receiver<Vec<u8>>>, until: Instant) -> String {
    let Some(rx) = rx else {
        return String::new();
    };
    let mut bytes = Vec::new();
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("output pipe still open after exit, returning partial output");
                break;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
