use crate::content::{ContentBlock, ToolOutput};
use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolContext, ToolSpec, optional_u64, require_string};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

const LOG_BYTES_MAX: usize = 32_000;
const TIMEOUT_SECS_MAX: u64 = 600;

pub struct BashTool {
    timeout: Duration,
    working_directory: PathBuf,
}

impl BashTool {
    pub fn new(timeout: Duration, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            timeout,
            working_directory: working_directory.into(),
        }
    }

    fn effective_timeout(&self, input: &serde_json::Value) -> Result<Duration> {
        match optional_u64(input, "timeout_secs")? {
            None => Ok(self.timeout),
            Some(0) => Err(ToolError::InvalidArguments(
                "timeout_secs must be positive".to_string(),
            )),
            Some(secs) => Ok(Duration::from_secs(secs.min(TIMEOUT_SECS_MAX))),
        }
    }
}

/// Collapse runs of whitespace so `rm  -rf /` and `rm -rf /` share a signature.
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Tool for BashTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "bash".to_string(),
            description: "Run a shell command and return its stdout, stderr and exit code."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "command": { "type": "string", "minLength": 1 },
                    "timeout_secs": { "type": "integer", "minimum": 1 }
                },
                "required": ["command"]
            }),
            is_mutating: true,
            is_file_edit: false,
            supports_abort: true,
        }
    }

    fn permission_key(&self, input: &serde_json::Value) -> Option<String> {
        input
            .get("command")
            .and_then(|v| v.as_str())
            .map(normalize_command)
    }

    fn normalize_pattern(&self, pattern: &str) -> Option<String> {
        Some(normalize_command(pattern)).filter(|p| !p.is_empty())
    }

    fn canonicalize(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        let command = require_string(&input, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "command must not be empty".to_string(),
            ));
        }
        let mut out = input;
        out["command"] = serde_json::Value::String(command.trim().to_string());
        Ok(out)
    }

    fn permission_hint(&self, input: &serde_json::Value) -> Option<String> {
        self.permission_key(input)
            .map(|cmd| format!("bash wants to run `{cmd}`"))
    }

    #[tracing::instrument(level = "info", skip_all, fields(tool_call_id = %ctx.call_id()))]
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let command = require_string(&input, "command")?;
        let timeout = self.effective_timeout(&input)?;

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let stdout_reader = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::ExecutionFailed("stdout not captured".to_string()))?;
        let mut stderr_reader = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::ExecutionFailed("stderr not captured".to_string()))?;

        let run = async {
            let read_stdout = async {
                let mut stdout = Vec::new();
                let mut lines = BufReader::new(stdout_reader).lines();
                while let Some(line) = lines.next_line().await? {
                    ctx.emit_progress(line.clone());
                    append_log(&mut stdout, line.as_bytes());
                    append_log(&mut stdout, b"\n");
                }
                Ok::<_, ToolError>(stdout)
            };
            let read_stderr = async {
                let mut stderr = Vec::new();
                stderr_reader.read_to_end(&mut stderr).await?;
                if stderr.len() > LOG_BYTES_MAX {
                    stderr.drain(0..stderr.len() - LOG_BYTES_MAX);
                }
                Ok::<_, ToolError>(stderr)
            };
            let (stdout, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
            let status = child.wait().await?;
            Ok::<_, ToolError>((stdout, stderr, status))
        };

        let (stdout, stderr, status) = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(ToolError::Cancelled),
            r = tokio::time::timeout(timeout, run) => r
                .map_err(|_| ToolError::ExecutionFailed(format!(
                    "command timed out after {}s", timeout.as_secs()
                )))??,
        };

        let exit_code = status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        let mut content = Vec::new();
        if !stdout.trim().is_empty() {
            content.push(ContentBlock::text(stdout.trim_end()));
        }
        if !stderr.trim().is_empty() {
            content.push(ContentBlock::text(stderr.trim_end()));
        }
        if exit_code != 0 {
            content.push(ContentBlock::text(format!("exit code {exit_code}")));
        }
        if content.is_empty() {
            content.push(ContentBlock::text("(no output)"));
        }
        tracing::debug!(exit_code, "bash command finished");
        Ok(ToolOutput {
            content,
            is_error: exit_code != 0,
        })
    }
}

fn append_log(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(bytes);
    if buffer.len() > LOG_BYTES_MAX {
        let drop_len = buffer.len() - LOG_BYTES_MAX;
        buffer.drain(0..drop_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(dir: &std::path::Path) -> BashTool {
        BashTool::new(Duration::from_secs(5), dir)
    }

    #[tokio::test]
    async fn bash_echo_streams_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ToolContext::new("tc1").with_progress(tx);
        let out = tool(dir.path())
            .execute(json!({ "command": "echo hello; echo world" }), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content[0].as_text(), Some("hello\nworld"));
        assert_eq!(rx.recv().await.unwrap().message, "hello");
        assert_eq!(rx.recv().await.unwrap().message, "world");
    }

    #[tokio::test]
    async fn bash_nonzero_exit_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path())
            .execute(
                json!({ "command": "echo oops >&2; exit 3" }),
                &ToolContext::new("tc1"),
            )
            .await
            .unwrap();
        assert!(out.is_error);
        let texts: Vec<_> = out.content.iter().filter_map(|b| b.as_text()).collect();
        assert!(texts.contains(&"oops"));
        assert!(texts.contains(&"exit code 3"));
    }

    #[tokio::test]
    async fn bash_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path())
            .execute(
                json!({ "command": "sleep 5", "timeout_secs": 1 }),
                &ToolContext::new("tc1"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn bash_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = tokio_util::sync::CancellationToken::new();
        let ctx = ToolContext::new("tc1").with_cancel_token(cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = tool(dir.path())
            .execute(json!({ "command": "sleep 5" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[test]
    fn permission_key_normalizes_whitespace() {
        let t = BashTool::new(Duration::from_secs(1), ".");
        assert_eq!(
            t.permission_key(&json!({"command": "  rm   -rf  / "})),
            Some("rm -rf /".to_string())
        );
        assert!(t.canonicalize(json!({"command": "   "})).is_err());
        assert_eq!(
            t.canonicalize(json!({"command": " ls "})).unwrap()["command"],
            "ls"
        );
    }

    #[test]
    fn rule_patterns_normalize_like_commands() {
        let t = BashTool::new(Duration::from_secs(1), ".");
        assert_eq!(t.normalize_pattern(" rm  -rf / ").as_deref(), Some("rm -rf /"));
        assert_eq!(t.normalize_pattern("   "), None);
        assert_eq!(
            t.rule_keys(&json!({"command": "rm   -rf /"})),
            vec!["rm -rf /".to_string()]
        );
    }
}
