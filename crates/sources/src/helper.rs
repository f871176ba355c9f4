//! Helper-process sensor source.
//!
//! Spawns the privileged sensor helper, waits for it to report ready, then
//! asks for one metrics line per poll. A reader thread forwards stdout lines
//! into a channel so every wait can carry a timeout.

use crossbeam::channel::{select, unbounded, Receiver, TryRecvError};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thermal_engine_core::{
    InterruptHandle, OpenError, PollError, SensorSource, SourceReady, HELPER_RESPONSE_TIMEOUT,
    HELPER_SHUTDOWN_GRACE, HELPER_STARTUP_TIMEOUT,
};
use thermal_engine_types::SensorSnapshot;

use crate::protocol::{self, HelperLine, CMD_DIAG, CMD_QUIT, CMD_READ, DIAG_END};

#[cfg(windows)]
pub const HELPER_EXECUTABLE: &str = "SensorHelperApp.exe";
#[cfg(not(windows))]
pub const HELPER_EXECUTABLE: &str = "SensorHelperApp";

/// Helper process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Explicit executable path; searched for when unset or missing
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Extra arguments passed to the helper
    #[serde(default)]
    pub args: Vec<String>,
    /// Directories searched for the executable (also their `lhm/` subdirectory)
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_startup_timeout_ms() -> u64 {
    HELPER_STARTUP_TIMEOUT.as_millis() as u64
}

fn default_response_timeout_ms() -> u64 {
    HELPER_RESPONSE_TIMEOUT.as_millis() as u64
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            search_dirs: Vec::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl HelperConfig {
    fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Every path the executable is looked for at, in order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(exe) = &self.executable {
            paths.push(exe.clone());
        }
        let mut dirs = self.search_dirs.clone();
        if let Some(app_dir) = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        {
            dirs.push(app_dir);
        }
        for dir in dirs {
            paths.push(dir.join(HELPER_EXECUTABLE));
            paths.push(dir.join("lhm").join(HELPER_EXECUTABLE));
        }
        paths
    }
}

/// Running helper process and its plumbing
struct HelperProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

pub struct HelperProcessSource {
    config: HelperConfig,
    process: Option<HelperProcess>,
    interrupt: InterruptHandle,
    interrupted: Receiver<()>,
}

impl HelperProcessSource {
    pub fn new(config: HelperConfig) -> Self {
        let (interrupt, interrupted) = InterruptHandle::new();
        Self {
            config,
            process: None,
            interrupt,
            interrupted,
        }
    }

    fn locate(&self) -> Result<PathBuf, OpenError> {
        let candidates = self.config.candidates();
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }
        let searched = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        Err(OpenError::NotInstalled {
            message: format!("{} not found", HELPER_EXECUTABLE),
            diagnostic: Some(format!("Searched:\n{}", searched)),
        })
    }

    fn spawn(&self, path: &PathBuf) -> Result<HelperProcess, OpenError> {
        log::info!("Starting sensor helper {}", path.display());
        let mut child = Command::new(path)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OpenError::Unavailable("helper stdio not captured".into()));
            }
        };

        let (tx, lines) = unbounded();
        let reader = thread::Builder::new()
            .name("sensor-helper-stdout".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::debug!("Helper stdout read error: {}", e);
                            break;
                        }
                    }
                }
                // dropping tx signals EOF to the receiver
            })?;

        thread::Builder::new()
            .name("sensor-helper-stderr".into())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("helper: {}", line);
                }
            })?;

        Ok(HelperProcess {
            child,
            stdin,
            lines,
            reader: Some(reader),
        })
    }

    fn send(&mut self, command: &str) -> Result<(), PollError> {
        // an interrupt meant for an earlier request
        while self.interrupted.try_recv().is_ok() {}
        let process = self.process.as_mut().ok_or(PollError::NotOpen)?;

        // Stale output from a previous timed-out command must not be taken
        // as the answer to this one.
        loop {
            match process.lines.try_recv() {
                Ok(line) => log::debug!("Discarding stale helper line: {}", line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(PollError::Crashed("helper closed its output".into()))
                }
            }
        }

        writeln!(process.stdin, "{}", command)
            .and_then(|_| process.stdin.flush())
            .map_err(|e| PollError::Crashed(format!("writing to helper failed: {}", e)))
    }

    fn recv(&mut self) -> Result<String, PollError> {
        let timeout = self.config.response_timeout();
        let interrupted = &self.interrupted;
        let process = self.process.as_mut().ok_or(PollError::NotOpen)?;
        select! {
            recv(process.lines) -> line => match line {
                Ok(line) => Ok(line),
                Err(_) => {
                    let status = process
                        .child
                        .try_wait()
                        .ok()
                        .flatten()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "closed its output".to_string());
                    Err(PollError::Crashed(format!("helper {}", status)))
                }
            },
            recv(interrupted) -> _ => Err(PollError::Interrupted),
            default(timeout) => Err(PollError::Timeout(timeout)),
        }
    }

    fn wait_ready(
        process: &mut HelperProcess,
        interrupted: &Receiver<()>,
        timeout: Duration,
    ) -> Result<(), OpenError> {
        let line = select! {
            recv(process.lines) -> line => line.map_err(|_| {
                OpenError::Unavailable("helper exited before reporting ready".into())
            })?,
            recv(interrupted) -> _ => {
                return Err(OpenError::Unavailable("interrupted while starting".into()))
            }
            default(timeout) => return Err(OpenError::Timeout(timeout)),
        };
        match protocol::parse_line(&line) {
            Ok(parsed) if parsed.is_ready() => Ok(()),
            Ok(HelperLine::Error(message)) => Err(OpenError::StartupFailed {
                message,
                diagnostic: None,
            }),
            Ok(other) => Err(OpenError::StartupFailed {
                message: format!("unexpected startup response {:?}", other),
                diagnostic: None,
            }),
            Err(e) => Err(OpenError::StartupFailed {
                message: format!("unreadable startup response: {}", e),
                diagnostic: None,
            }),
        }
    }

    fn shutdown(mut process: HelperProcess) {
        // Ask nicely first
        let _ = writeln!(process.stdin, "{}", CMD_QUIT);
        let _ = process.stdin.flush();
        drop(process.stdin);

        let deadline = Instant::now() + HELPER_SHUTDOWN_GRACE;
        loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("Sensor helper exited with {}", status);
                    break;
                }
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20));
                }
                _ => {
                    log::warn!("Sensor helper did not exit, killing it");
                    let _ = process.child.kill();
                    let _ = process.child.wait();
                    break;
                }
            }
        }

        drop(process.lines);
        // A grandchild may still hold the pipe open; never block on it
        if let Some(reader) = process.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
    }
}

impl SensorSource for HelperProcessSource {
    fn name(&self) -> &str {
        "helper-process"
    }

    fn open(&mut self) -> Result<SourceReady, OpenError> {
        self.close();
        let path = self.locate()?;
        let mut process = self.spawn(&path)?;

        while self.interrupted.try_recv().is_ok() {}
        if let Err(e) = Self::wait_ready(&mut process, &self.interrupted, self.config.startup_timeout()) {
            Self::shutdown(process);
            return Err(e);
        }

        log::warn!("=== Sensor helper ready ({}) ===", path.display());
        self.process = Some(process);
        Ok(SourceReady {
            detail: format!("helper {}", path.display()),
        })
    }

    fn poll(&mut self) -> Result<SensorSnapshot, PollError> {
        if let Some(process) = self.process.as_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                return Err(PollError::Crashed(format!("helper {}", status)));
            }
        }

        self.send(CMD_READ)?;
        let line = self.recv()?;
        match protocol::parse_line(&line) {
            Ok(HelperLine::Metrics(snapshot)) => Ok(snapshot),
            Ok(HelperLine::Error(message)) => Err(PollError::Remote(message)),
            Ok(HelperLine::Status(status)) => {
                Err(PollError::Malformed(format!("unexpected status {:?}", status)))
            }
            Err(e) => Err(PollError::Malformed(e)),
        }
    }

    fn diagnostics(&mut self) -> Result<String, PollError> {
        self.send(CMD_DIAG)?;
        let mut out = String::new();
        loop {
            let line = self.recv()?;
            if line.trim() == DIAG_END {
                break;
            }
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        Some(self.interrupt.clone())
    }

    fn close(&mut self) {
        if let Some(process) = self.process.take() {
            log::info!("Stopping sensor helper");
            Self::shutdown(process);
        }
    }
}

impl Drop for HelperProcessSource {
    fn drop(&mut self) {
        self.close();
    }
}
