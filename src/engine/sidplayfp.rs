// sidplayfp external-process engine
//
// Each render is an isolated child process. A watchdog kills the child once
// its encoded time limit plus a grace period has elapsed.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};

use crate::constants::{CLI_KILL_GRACE_MS, CLI_POLL_INTERVAL_MS, CLI_STDERR_DRAIN_MS};
use crate::error::{Result, SidflowError};
use super::sidplay_args::SidplayArgs;
use super::{params_mismatch, EngineId, EngineJob, EngineParams, EngineRun, RenderEngine};

/// Renders via the sidplayfp command-line player.
#[derive(Debug, Clone)]
pub struct SidplayfpEngine {
    binary: PathBuf,
    extra_args: Vec<String>,
    kill_grace: Duration,
}

impl SidplayfpEngine {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            extra_args: Vec::new(),
            kill_grace: Duration::from_millis(CLI_KILL_GRACE_MS),
        }
    }

    /// Tokens passed to sidplayfp before the generated flags.
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// Extra time a child may run past its `-t` limit before being killed.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }
}

impl RenderEngine for SidplayfpEngine {
    fn id(&self) -> EngineId {
        EngineId::SidplayfpCli
    }

    fn render(&self, job: &EngineJob<'_>) -> Result<EngineRun> {
        let EngineParams::SidplayfpCli(cli) = job.params else {
            return Err(params_mismatch(self.id(), job.params));
        };

        if let Some(parent) = job.wav_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let args = SidplayArgs::new()
            .extra(&self.extra_args)
            .tokens(&cli.tokens)
            .song(job.song_index)
            .wav_output(job.wav_path)
            .source(job.source_path)
            .build();

        log::debug!("Spawning {} {:?}", self.binary.display(), args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SidflowError::EngineFailed {
                engine: self.id(),
                message: format!("failed to spawn {}: {}", self.binary.display(), e),
            })?;

        let stderr_reader = drain_stderr(&mut child);
        let limit = Duration::from_secs(cli.time_limit_seconds).saturating_add(self.kill_grace);
        let waited = wait_with_deadline(&mut child, limit);
        let stderr = collect_stderr(stderr_reader, Duration::from_millis(CLI_STDERR_DRAIN_MS));

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                return Err(SidflowError::EngineTimeout {
                    engine: self.id(),
                    seconds: cli.time_limit_seconds,
                });
            }
            Err(e) => {
                return Err(SidflowError::EngineFailed {
                    engine: self.id(),
                    message: format!("failed waiting for sidplayfp: {}", e),
                });
            }
        };

        if !status.success() {
            return Err(SidflowError::EngineFailed {
                engine: self.id(),
                message: format!("sidplayfp exited with {}: {}", status, stderr.trim()),
            });
        }

        Ok(EngineRun { exit_code: status.code() })
    }
}

/// Read stderr on a helper thread so a chatty child cannot fill the pipe
/// and stall while we poll it.
fn drain_stderr(child: &mut Child) -> Option<Receiver<String>> {
    let mut stderr = child.stderr.take()?;
    let (tx, rx) = bounded(1);
    std::thread::Builder::new()
        .name("sidplayfp-stderr".into())
        .spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            let _ = tx.send(buf);
        })
        .ok()?;
    Some(rx)
}

/// Captured stderr, waiting at most `wait` after the child is gone.
///
/// A grandchild that inherited the pipe keeps it open past the child's exit;
/// the reader thread is then left behind and the output dropped.
fn collect_stderr(reader: Option<Receiver<String>>, wait: Duration) -> String {
    let Some(rx) = reader else {
        return String::new();
    };
    match rx.recv_timeout(wait) {
        Ok(text) => text,
        Err(_) => {
            log::debug!("sidplayfp stderr still open after {:?}, not waiting for it", wait);
            String::new()
        }
    }
}

/// Poll until the child exits or `limit` elapses. On timeout the child is
/// killed and reaped, and `Ok(None)` is returned.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    let poll = Duration::from_millis(CLI_POLL_INTERVAL_MS);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            log::warn!("sidplayfp (pid {}) exceeded {:?}, killing", child.id(), limit);
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(poll);
    }
}
