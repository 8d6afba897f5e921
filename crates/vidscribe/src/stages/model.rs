//! Long-lived model subprocesses.
//!
//! Speech-to-text and captioning models are expensive to load, so each worker
//! process keeps one child process per model alive across jobs and talks to
//! it over stdin/stdout, one JSON object per line:
//!
//! ```text
//! -> {"op":"warm_up"}
//! <- {"result":null}
//! -> {"op":"transcribe","audio_path":"/work/001_clip/audio.wav"}
//! <- {"result":[{"start":0.0,"end":2.4,"text":"hello"}]}
//! -> {"op":"caption","image_path":"/work/001_clip/frames/frame_00001.jpg"}
//! <- {"error":"could not decode image"}
//! ```

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{normalize_segments, Captioner, Segment, Transcriber};
use crate::error::StageError;
use crate::sanitize::redact_path;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch a model process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One running child speaking the JSON-lines protocol.
struct ModelProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// Outcome of a single request that did not produce a result.
enum CallError {
    /// The model answered with `{"error": ...}`; the process is still usable.
    Model(String),
    /// The pipe broke or the answer was unreadable; the process is discarded.
    Transport(StageError),
}

impl ModelProcess {
    fn spawn(command: &ModelCommand) -> Result<Self, StageError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| StageError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok(Self {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(StageError::Protocol(format!(
                    "'{}' started without piped stdio",
                    command.program
                )))
            }
        }
    }

    fn request(&mut self, request: &Value) -> Result<Value, CallError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            CallError::Transport(StageError::Protocol("model stdin is closed".to_string()))
        })?;

        let mut line = request.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| {
                CallError::Transport(StageError::Protocol(format!("write to model failed: {e}")))
            })?;

        let mut response = String::new();
        let read = self.stdout.read_line(&mut response).map_err(|e| {
            CallError::Transport(StageError::Protocol(format!("read from model failed: {e}")))
        })?;
        if read == 0 {
            return Err(CallError::Transport(StageError::Protocol(
                "model process closed its output".to_string(),
            )));
        }

        let mut value: Value = serde_json::from_str(response.trim()).map_err(|e| {
            CallError::Transport(StageError::Protocol(format!("invalid model response: {e}")))
        })?;
        if let Some(message) = value.get("error") {
            let message = message
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.to_string());
            return Err(CallError::Model(message));
        }
        match value.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(CallError::Transport(StageError::Protocol(
                "model response has neither 'result' nor 'error'".to_string(),
            ))),
        }
    }

    /// Closes stdin so the child can exit on its own, then kills it if it
    /// outlives the grace period.
    fn terminate(mut self) {
        drop(self.stdin.take());
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20))
                }
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Default)]
struct ClientState {
    warmed: bool,
    process: Option<ModelProcess>,
}

/// Shared handle to one model process. Requests are serialized; worker
/// threads calling concurrently queue on the mutex.
pub struct ModelClient {
    name: &'static str,
    command: ModelCommand,
    state: Mutex<ClientState>,
}

impl ModelClient {
    pub fn new(name: &'static str, command: ModelCommand) -> Self {
        Self {
            name,
            command,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Starts the process and waits until the model reports it is loaded.
    pub fn warm_up(&self) -> Result<(), StageError> {
        let mut state = self.lock()?;
        if state.process.is_none() {
            log::info!("Starting {} model process: {}", self.name, self.command.program);
            state.process = Some(ModelProcess::spawn(&self.command)?);
        }
        state.warmed = true;
        drop(state);
        self.call(&json!({ "op": "warm_up" }))?;
        Ok(())
    }

    pub fn call(&self, request: &Value) -> Result<Value, StageError> {
        let mut state = self.lock()?;
        if !state.warmed {
            return Err(StageError::Model(format!(
                "{} model is not running; warm_up must be called first",
                self.name
            )));
        }
        if state.process.is_none() {
            log::warn!("Restarting {} model process", self.name);
            state.process = Some(ModelProcess::spawn(&self.command)?);
        }

        let Some(process) = state.process.as_mut() else {
            return Err(StageError::Model(format!("{} model is not running", self.name)));
        };
        match process.request(request) {
            Ok(value) => Ok(value),
            Err(CallError::Model(message)) => Err(StageError::Model(message)),
            Err(CallError::Transport(e)) => {
                log::error!("{} model process failed: {}", self.name, e);
                if let Some(broken) = state.process.take() {
                    broken.terminate();
                }
                Err(e)
            }
        }
    }

    pub fn shutdown(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.warmed = false;
        if let Some(process) = state.process.take() {
            log::info!("Stopping {} model process", self.name);
            process.terminate();
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ClientState>, StageError> {
        self.state
            .lock()
            .map_err(|_| StageError::Model(format!("{} model lock poisoned", self.name)))
    }
}

impl Drop for ModelClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`Transcriber`] backed by a speech-to-text model process.
pub struct ModelTranscriber {
    client: ModelClient,
}

impl ModelTranscriber {
    pub fn new(command: ModelCommand) -> Self {
        Self {
            client: ModelClient::new("transcriber", command),
        }
    }
}

impl Transcriber for ModelTranscriber {
    fn warm_up(&self) -> Result<(), StageError> {
        self.client.warm_up()
    }

    fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>, StageError> {
        let _span = tracing::info_span!("transcribe", audio = %redact_path(audio)).entered();
        if !audio.is_file() {
            return Err(StageError::InvalidInput(format!(
                "audio '{}' does not exist",
                audio.display()
            )));
        }

        let result = self.client.call(&json!({
            "op": "transcribe",
            "audio_path": audio.to_string_lossy(),
        }))?;
        let segments: Vec<Segment> = serde_json::from_value(result)
            .map_err(|e| StageError::Protocol(format!("invalid transcription result: {e}")))?;

        let segments = normalize_segments(segments);
        tracing::debug!(segments = segments.len(), "transcribed");
        Ok(segments)
    }

    fn shutdown(&self) {
        self.client.shutdown();
    }
}

/// [`Captioner`] backed by an image-captioning model process.
pub struct ModelCaptioner {
    client: ModelClient,
}

impl ModelCaptioner {
    pub fn new(command: ModelCommand) -> Self {
        Self {
            client: ModelClient::new("captioner", command),
        }
    }
}

impl Captioner for ModelCaptioner {
    fn warm_up(&self) -> Result<(), StageError> {
        self.client.warm_up()
    }

    fn caption(&self, frame: &Path) -> Result<String, StageError> {
        if !frame.is_file() {
            return Err(StageError::InvalidInput(format!(
                "frame '{}' does not exist",
                frame.display()
            )));
        }

        let result = self.client.call(&json!({
            "op": "caption",
            "image_path": frame.to_string_lossy(),
        }))?;
        match result {
            Value::String(caption) => Ok(caption.trim().to_string()),
            other => Err(StageError::Protocol(format!(
                "caption result must be a string, got {other}"
            ))),
        }
    }

    fn shutdown(&self) {
        self.client.shutdown();
    }
}
