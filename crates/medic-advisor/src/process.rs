use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::types::{AdviceRequest, AdvisorOptions, Suggestion};
use crate::{AdvisorError, Result};

// ─── AdvisorProcess ───────────────────────────────────────────────────────

/// A running advisor subprocess.
///
/// The request is written as one JSON line on stdin, after which stdin is
/// closed. Suggestions are read as JSONL from stdout; a line holding a JSON
/// array of suggestions is accepted too. Stderr is captured in a background
/// task and surfaced when the process exits with an error.
pub(crate) struct AdvisorProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_buf: Arc<Mutex<String>>,
}

impl AdvisorProcess {
    /// Spawn the configured advisor and hand it the request.
    pub(crate) async fn spawn(opts: &AdvisorOptions, request: &AdviceRequest) -> Result<Self> {
        let mut cmd = Command::new(&opts.command);
        cmd.args(&opts.args);
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }

        let mut process = Self::from_command(cmd)?;
        process.send_request(request).await?;
        Ok(process)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the handle on timeout or cancellation must not leave
            // an orphaned reasoning process behind.
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(AdvisorError::Io)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdvisorError::Process("stdout not captured".into()))?;

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            });
        }

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stderr_buf,
        })
    }

    async fn send_request(&mut self, request: &AdviceRequest) -> Result<()> {
        let mut stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| AdvisorError::Process("stdin not captured".into()))?;

        let mut buf = serde_json::to_vec(request)
            .map_err(|e| AdvisorError::Process(format!("failed to serialize request: {e}")))?;
        buf.push(b'\n');

        stdin.write_all(&buf).await.map_err(AdvisorError::Io)?;
        stdin.flush().await.map_err(AdvisorError::Io)?;
        // stdin drops here: the advisor sees EOF after one request.
        Ok(())
    }

    /// Read stdout to EOF, collecting every suggestion.
    ///
    /// JSON objects without a `kind` field (progress or log events) are
    /// skipped. Anything that is not JSON is a parse error.
    pub(crate) async fn collect_suggestions(&mut self) -> Result<Vec<Suggestion>> {
        let mut out = Vec::new();
        loop {
            let line = match self.lines.next_line().await {
                Err(e) => return Err(AdvisorError::Io(e)),
                Ok(None) => break,
                Ok(Some(line)) => line,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_str(trimmed).map_err(|e| AdvisorError::Parse {
                    line: trimmed.to_owned(),
                    source: e,
                })?;
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        out.push(parse_suggestion(trimmed, item)?);
                    }
                }
                serde_json::Value::Object(ref map) if map.contains_key("kind") => {
                    out.push(parse_suggestion(trimmed, value)?);
                }
                _ => continue,
            }
        }
        Ok(out)
    }

    /// Wait for exit and return an error for a non-zero status.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<AdvisorError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(AdvisorError::Io(e)),
        };

        if status.success() {
            return None;
        }

        let stderr = self
            .stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();

        let head = match status.code() {
            Some(code) => format!("advisor exited with code {code}"),
            None => "advisor terminated by signal".to_string(),
        };
        let msg = if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        };
        Some(AdvisorError::Process(msg))
    }
}

fn parse_suggestion(line: &str, value: serde_json::Value) -> Result<Suggestion> {
    serde_json::from_value(value).map_err(|e| AdvisorError::Parse {
        line: line.to_owned(),
        source: e,
    })
}
