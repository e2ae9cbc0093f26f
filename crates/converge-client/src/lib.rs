use converge_config::{AgentSettings, RunConfig};
use converge_core::{AgentMessage, ConvergeError, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::Stream;
use tracing::{debug, info};

/// Client for the coding-agent CLI backend.
///
/// Each `query` spawns one backend process and exposes its line-delimited
/// JSON output as a message stream. Streams are one-shot; turn limits and
/// tool execution live entirely in the backend.
pub struct AgentClient {
    run: RunConfig,
    agent: AgentSettings,
}

impl AgentClient {
    pub fn new(run: RunConfig, agent: AgentSettings) -> Self {
        Self { run, agent }
    }

    /// Argument list handed to the backend CLI for `run`.
    pub fn backend_args(run: &RunConfig, agent: &AgentSettings) -> Vec<String> {
        vec![
            "-p".to_string(),
            run.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            // stream-json output requires verbose mode in print mode
            "--verbose".to_string(),
            "--max-turns".to_string(),
            run.max_turns.to_string(),
            "--system-prompt".to_string(),
            run.system_prompt.clone(),
            "--permission-mode".to_string(),
            run.permission_mode.clone(),
            "--allowedTools".to_string(),
            agent.allowed_tools.join(","),
        ]
    }

    /// Open the streaming request. Yields one message per backend output
    /// line and terminates when the backend closes its stream; a non-zero
    /// backend exit surfaces as a final error item.
    pub async fn query(&self) -> Result<impl Stream<Item = Result<AgentMessage>>> {
        let args = Self::backend_args(&self.run, &self.agent);
        debug!(backend = %self.agent.cli_path.display(), "spawning agent backend");

        let mut child = Command::new(&self.agent.cli_path)
            .args(&args)
            .current_dir(&self.run.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConvergeError::AgentError(format!("Failed to spawn agent backend: {e}"))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ConvergeError::AgentError("Agent backend produced no stdout handle".into())
        })?;

        info!(run_id = %self.run.run_id, "agent stream opened");

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match AgentMessage::from_json_line(&line) {
                            Ok(message) => yield Ok(message),
                            Err(e) => {
                                yield Err(ConvergeError::AgentError(format!(
                                    "Unparsable message from backend: {e}"
                                )));
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        match child.wait().await {
                            Ok(status) if status.success() => {}
                            Ok(status) => {
                                yield Err(ConvergeError::AgentError(format!(
                                    "Agent backend exited with {status}"
                                )));
                            }
                            Err(e) => {
                                yield Err(ConvergeError::IoError(e));
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(ConvergeError::IoError(e));
                        break;
                    }
                }
            }
        };

        Ok(stream)
    }
}
