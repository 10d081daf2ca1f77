//! `sh -c` plumbing shared by the command-backed adapters.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{MedicError, Result};

/// Characters of stdout/stderr kept in details and error messages.
pub(crate) const DETAIL_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub(crate) struct ShellOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// Short human description of a failed run.
    pub fn failure_detail(&self) -> String {
        let code = self
            .code
            .map(|c| format!("exit code {c}"))
            .unwrap_or_else(|| "killed by signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            code
        } else {
            format!("{code}: {}", truncate(stderr, DETAIL_LIMIT))
        }
    }
}

/// Run `script` through `sh -c`.
///
/// The child is killed if the returned future is dropped, so wrapping the
/// call in `tokio::time::timeout` or a `select!` against shutdown leaves no
/// stray process behind.
pub(crate) async fn run_shell(
    script: &str,
    cwd: &Path,
    env: &[(&str, String)],
    stdin: Option<&[u8]>,
) -> Result<ShellOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    if !cwd.as_os_str().is_empty() {
        cmd.current_dir(cwd);
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| MedicError::SpawnFailed {
        command: script.to_string(),
        reason: e.to_string(),
    })?;

    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // A script that never reads stdin closes the pipe early; that is
        // not an error for us.
        let _ = pipe.write_all(bytes).await;
        drop(pipe);
    }

    let output = child.wait_with_output().await?;
    Ok(ShellOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

pub(crate) fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_env_and_stdin() {
        let out = run_shell(
            "printf '%s:' \"$GREETING\"; cat",
            Path::new(""),
            &[("GREETING", "hello".to_string())],
            Some(b"world"),
        )
        .await
        .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "hello:world");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_code_and_stderr() {
        let out = run_shell("echo boom >&2; exit 4", Path::new(""), &[], None)
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(4));
        assert_eq!(out.failure_detail(), "exit code 4: boom");
    }

    #[tokio::test]
    async fn timeout_drops_the_child() {
        let res = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            run_shell("sleep 5", Path::new(""), &[], None),
        )
        .await;
        assert!(res.is_err());
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
