use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::error::{HiveError, Result};
use crate::plan::Task;

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub summary: String,
}

/// Opaque capability that turns a task description into a code change on
/// an isolated branch. Its internals (code generation) are not part of
/// this engine; the gates judge only the resulting working tree.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, checkout: &Path, branch: &str)
    -> Result<ExecutionReport>;
}

/// Default executor: runs a configured command inside the checkout with the
/// task handed over via environment variables.
pub struct CommandExecutor {
    command: String,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.executor_command.clone(),
            timeout: Duration::from_secs(config.executor_timeout_secs),
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        task: &Task,
        checkout: &Path,
        branch: &str,
    ) -> Result<ExecutionReport> {
        debug!(command = %self.command, task = task.number, branch, "Spawning executor");

        let mut cmd = Command::new(&self.command);
        cmd.current_dir(checkout)
            .env("TASKHIVE_TASK_NUMBER", task.number.to_string())
            .env("TASKHIVE_TASK_TITLE", &task.title)
            .env("TASKHIVE_TASK_DESCRIPTION", &task.description)
            .env("TASKHIVE_TASK_FILES", task.files.join(","))
            .env("TASKHIVE_BRANCH", branch);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                HiveError::Executor(format!(
                    "executor timed out after {}s on task {}",
                    self.timeout.as_secs(),
                    task.number
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HiveError::Executor(format!(
                "executor exited with {} on task {}: {}",
                output.status,
                task.number,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary: String = stdout
            .lines()
            .rev()
            .take(20)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");

        info!(task = task.number, branch, "Executor finished");
        Ok(ExecutionReport { summary })
    }
}
