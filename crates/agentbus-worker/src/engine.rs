// SPDX-License-Identifier: MIT OR Apache-2.0
//! Spawning and supervising the LLM engine subprocess for one task attempt
//! (spec §4.7 step g). Grounded on the sidecar-spawn pattern used across the
//! rest of this stack: piped stdio, stderr forwarded through `tracing`, and
//! a captured copy of combined output for post-mortem classification
//! ([`agentbus_retry::classify_failure`]).
//!
//! Each attempt also gets an ephemeral credential store: a fresh temp
//! directory created before spawn, exported to the child via
//! [`CREDENTIAL_STORE_ENV`], and removed whenever the [`EngineHandle`] is
//! dropped — on normal completion, on the kill path used for supersede and
//! timeout escalation, or on a spawn failure. No code path holds the engine
//! handle without eventually dropping it, so this is the one place the
//! store's lifetime needs to be tied to.

use agentbus_core::error::{BusError, BusErrorCode};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Environment variable pointing an engine subprocess at its ephemeral
/// per-attempt credential store (spec §5/§9).
const CREDENTIAL_STORE_ENV: &str = "AGENTBUS_CREDENTIAL_STORE";

/// Everything needed to spawn one engine attempt.
#[derive(Debug, Clone)]
pub struct EngineSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory the engine runs in (the task's repo checkout).
    pub cwd: PathBuf,
    /// Additional environment variables.
    pub env: BTreeMap<String, String>,
    /// Text handed to the engine on stdin (the prompt envelope).
    pub stdin: String,
}

/// A live, supervised engine process.
#[async_trait]
pub trait EngineHandle: Send {
    /// OS process id, used for the SIGTERM escalation step.
    fn pid(&self) -> u32;

    /// Non-blocking poll for exit.
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>>;

    /// Block until the process exits.
    async fn wait(&mut self) -> std::io::Result<ExitStatus>;

    /// Unconditional hard kill (SIGKILL on unix).
    async fn kill(&mut self) -> std::io::Result<()>;

    /// Combined stdout+stderr captured so far, newest last.
    fn combined_output(&self) -> String;
}

/// Spawns [`EngineHandle`]s. The production implementation is
/// [`CommandEngineLauncher`]; tests substitute a launcher that runs a real
/// but trivial command (e.g. `sh -c`) rather than mocking the process
/// boundary away.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Spawn one engine attempt.
    async fn spawn(&self, spec: &EngineSpec) -> Result<Box<dyn EngineHandle>, BusError>;
}

/// Spawns the engine as a real OS subprocess via [`tokio::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandEngineLauncher;

#[async_trait]
impl EngineLauncher for CommandEngineLauncher {
    async fn spawn(&self, spec: &EngineSpec) -> Result<Box<dyn EngineHandle>, BusError> {
        let credential_dir = tempfile::tempdir().map_err(|e| {
            BusError::new(
                BusErrorCode::SandboxPermission,
                format!("create ephemeral credential store: {e}"),
            )
        })?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .env(CREDENTIAL_STORE_ENV, credential_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Nothing was spawned; drop the store immediately instead of
                // leaving it for a handle that will never exist.
                drop(credential_dir);
                return Err(BusError::new(
                    BusErrorCode::SandboxPermission,
                    format!("spawn engine '{}': {e}", spec.program),
                ));
            }
        };
        let pid = child.id().unwrap_or(0);

        use tokio::io::AsyncWriteExt as _;
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = spec.stdin.clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = Arc::new(Mutex::new(String::new()));
        forward_stream(child.stdout.take(), Arc::clone(&output), "stdout");
        forward_stream(child.stderr.take(), Arc::clone(&output), "stderr");

        Ok(Box::new(ChildEngineHandle {
            child,
            pid,
            output,
            _credential_dir: credential_dir,
        }))
    }
}

fn forward_stream<R>(stream: Option<R>, output: Arc<Mutex<String>>, label: &'static str)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else { return };
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = line.trim_end();
                    if !text.is_empty() {
                        tracing::debug!(target: "agentbus_worker.engine", stream = label, "{text}");
                    }
                    let mut buf = output.lock().unwrap_or_else(|e| e.into_inner());
                    buf.push_str(text);
                    buf.push('\n');
                }
                Err(_) => break,
            }
        }
    });
}

struct ChildEngineHandle {
    child: Child,
    pid: u32,
    output: Arc<Mutex<String>>,
    /// Ephemeral per-attempt credential store (spec §5/§9): removed on drop,
    /// which happens on every exit path this handle can take, including the
    /// kill path used on supersede/timeout escalation.
    _credential_dir: TempDir,
}

#[async_trait]
impl EngineHandle for ChildEngineHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()?;
        let _ = self.child.wait().await;
        Ok(())
    }

    fn combined_output(&self) -> String {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
