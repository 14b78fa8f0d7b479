use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::AdapterError;
use crate::options::QueryOptions;
use crate::types::{control_response_line, Message};
use crate::Result;

// ─── ClaudeProcess ────────────────────────────────────────────────────────

/// A running `claude --print --output-format stream-json` subprocess.
///
/// Reads one JSONL message per call to `next_message`; control responses
/// are written back through the retained stdin handle. `QueryStream` wraps
/// this in an async `Stream`.
pub(crate) struct ClaudeProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stdin: Option<ChildStdin>,
}

impl ClaudeProcess {
    /// Spawn the real `claude` binary with the given prompt and options.
    ///
    /// `CLAUDECODE` is removed from the environment so this works both from
    /// a terminal and from inside a running assistant session.
    pub(crate) fn spawn(prompt: &str, opts: &QueryOptions) -> Result<Self> {
        let mut cmd = build_command(prompt, opts);
        cmd.env_remove("CLAUDECODE");
        Self::from_command(cmd)
    }

    /// Spawn an arbitrary command as a mock backend process.
    /// Used in tests to inject a command that emits fixed JSON lines.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(AdapterError::Io)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::Process("stdout not captured".into()))?;
        let stdin = child.stdin.take();

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stdin,
        })
    }

    /// Read the next non-empty JSONL line from stdout and deserialize it.
    ///
    /// Returns `Ok(None)` on EOF (process exited).
    pub(crate) async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            match self.lines.next_line().await {
                Err(e) => return Err(AdapterError::Io(e)),
                Ok(None) => return Ok(None),
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return serde_json::from_str(trimmed).map(Some).map_err(|e| {
                        AdapterError::Parse {
                            line: trimmed.to_owned(),
                            source: e,
                        }
                    });
                }
            }
        }
    }

    /// Answer a `control_request` frame on the subprocess's stdin.
    pub(crate) async fn respond_control(
        &mut self,
        request_id: &str,
        response: serde_json::Value,
    ) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AdapterError::Process("stdin not captured".into()))?;
        let mut line = control_response_line(request_id, response);
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// If the process exited non-zero without a terminal result, surface it.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<AdapterError> {
        match self.child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => Some(AdapterError::Process(format!(
                "backend exited with {status} before a result message"
            ))),
            Err(e) => Some(AdapterError::Io(e)),
        }
    }

    /// Kill the subprocess (best-effort; errors are silently ignored).
    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

// ─── Command builder ──────────────────────────────────────────────────────

fn build_command(prompt: &str, opts: &QueryOptions) -> Command {
    let program = opts.path_to_executable.as_deref().unwrap_or("claude");
    let mut cmd = Command::new(program);

    // Non-interactive streaming mode
    cmd.arg("--print").arg("--output-format").arg("stream-json");

    if opts.include_partial_messages {
        cmd.arg("--include-partial-messages");
    }

    if opts.can_use_tool.is_some() {
        // Route tool-permission prompts through the stdin control protocol.
        cmd.arg("--permission-prompt-tool").arg("stdio");
    }

    if let Some(sp) = &opts.system_prompt {
        cmd.arg("--system-prompt").arg(sp);
    }

    if let Some(resume) = &opts.resume {
        cmd.arg("--resume").arg(resume);
    }

    if let Some(sources) = &opts.setting_sources {
        let joined = sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        cmd.arg("--setting-sources").arg(joined);
    }

    if !opts.mcp_servers.is_empty() {
        let config = serde_json::json!({ "mcpServers": opts.mcp_servers });
        cmd.arg("--mcp-config").arg(config.to_string());
    }

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    // Prompt is the final positional argument
    cmd.arg(prompt);

    cmd
}
