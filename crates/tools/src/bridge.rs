//! External process bridge: request/response frames over a subprocess's
//! standard streams.
//!
//! Each request is the input text followed by one ETX (0x03) byte; the
//! subprocess answers with its output followed by ETX. The subprocess is
//! expected to speak this framing (see `scripts/etx_console.py`).
//!
//! [`SessionBridges`] keeps one bridge per session, spawned lazily, each
//! behind its own lock so a session never has two exchanges in flight.

use chatrelay_core::error::BridgeError;
use chatrelay_core::message::ConversationId;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// End-of-text control byte terminating every frame.
pub const ETX: u8 = 0x03;

/// A long-lived subprocess spoken to in ETX-terminated frames.
pub struct ProcessBridge {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl ProcessBridge {
    /// Spawn `program` with piped stdin/stdout. Stderr is inherited.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, BridgeError> {
        let spawn_error = |reason: String| BridgeError::Spawn {
            program: program.to_string(),
            reason,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".into()))?;

        info!(program, pid = ?child.id(), "Spawned subprocess");

        Ok(Self {
            program: program.to_string(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    /// Send one frame and wait for the reply frame.
    ///
    /// Empty input returns an empty string without touching the process.
    /// Blocks until the subprocess emits ETX or closes its output.
    pub async fn send(&mut self, input: &str) -> Result<String, BridgeError> {
        if input.is_empty() {
            return Ok(String::new());
        }

        let stdin = self.stdin.as_mut().ok_or(BridgeError::Closed)?;
        let mut frame = Vec::with_capacity(input.len() + 1);
        frame.extend_from_slice(input.as_bytes());
        frame.push(ETX);
        stdin
            .write_all(&frame)
            .await
            .map_err(|e| BridgeError::Write(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| BridgeError::Write(e.to_string()))?;
        self.inputs.push(input.to_string());

        let mut buf = Vec::new();
        self.stdout
            .read_until(ETX, &mut buf)
            .await
            .map_err(|e| BridgeError::Read(e.to_string()))?;
        if buf.pop() != Some(ETX) {
            return Err(BridgeError::Closed);
        }

        let output = String::from_utf8_lossy(&buf).trim().to_string();
        debug!(program = %self.program, bytes = output.len(), "Subprocess replied");
        self.outputs.push(output.clone());
        Ok(output)
    }

    /// Write a terminating ETX, close stdin and wait for the process to exit.
    pub async fn close(&mut self) -> Result<ExitStatus, BridgeError> {
        if let Some(mut stdin) = self.stdin.take() {
            // The process may already be gone; closing proceeds regardless.
            let _ = stdin.write_all(&[ETX]).await;
            let _ = stdin.flush().await;
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| BridgeError::Read(e.to_string()))?;
        info!(program = %self.program, %status, "Subprocess exited");
        Ok(status)
    }

    /// Inputs sent so far, oldest first.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Outputs received so far, oldest first.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// One lazily spawned [`ProcessBridge`] per session.
pub struct SessionBridges {
    program: String,
    args: Vec<String>,
    bridges: Mutex<HashMap<ConversationId, Arc<Mutex<ProcessBridge>>>>,
}

impl SessionBridges {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            bridges: Mutex::new(HashMap::new()),
        }
    }

    /// Exchange one frame with the session's process, spawning it first if
    /// needed. A failed exchange discards the process; the next call spawns
    /// a fresh one.
    pub async fn send(&self, session: &ConversationId, input: &str) -> Result<String, BridgeError> {
        if input.is_empty() {
            return Ok(String::new());
        }

        let bridge = self.get_or_spawn(session).await?;
        let result = bridge.lock().await.send(input).await;

        if let Err(e) = &result {
            warn!(%session, error = %e, "Discarding failed subprocess");
            self.release(session).await;
        }
        result
    }

    /// Close and forget the session's process. Returns whether one existed.
    pub async fn release(&self, session: &ConversationId) -> bool {
        let removed = self.bridges.lock().await.remove(session);
        match removed {
            Some(bridge) => {
                if let Err(e) = bridge.lock().await.close().await {
                    warn!(%session, error = %e, "Subprocess did not shut down cleanly");
                }
                true
            }
            None => false,
        }
    }

    /// Number of live session processes.
    pub async fn len(&self) -> usize {
        self.bridges.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn get_or_spawn(
        &self,
        session: &ConversationId,
    ) -> Result<Arc<Mutex<ProcessBridge>>, BridgeError> {
        let mut bridges = self.bridges.lock().await;
        if let Some(bridge) = bridges.get(session) {
            return Ok(bridge.clone());
        }
        let bridge = Arc::new(Mutex::new(ProcessBridge::spawn(&self.program, &self.args)?));
        bridges.insert(session.clone(), bridge.clone());
        debug!(%session, "Session subprocess registered");
        Ok(bridge)
    }
}
