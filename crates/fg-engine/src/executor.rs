use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

/// Environment variables forwarded from the parent process into every
/// subprocess; everything else is dropped.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "TERM", "USER", "SHELL"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// Last few lines of stderr, for phase logs.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Run one external program with a scrubbed environment and a hard
/// timeout. Used for git, the target project's build, the LLVM tool
/// chain, and the pointer analyzer.
pub async fn run_command(
    program: &str,
    args: &[&str],
    work_dir: &Path,
    timeout: Duration,
    env: &HashMap<String, String>,
) -> CommandOutput {
    let start = Instant::now();
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    cmd.current_dir(work_dir);
    cmd.env_clear();
    for var in SAFE_ENV_VARS {
        if let Ok(val) = std::env::var(var) {
            cmd.env(var, val);
        }
    }
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.kill_on_drop(true);

    let result = tokio::time::timeout(timeout, cmd.output()).await;
    let duration = start.elapsed();
    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let status = if output.status.success() {
                CommandStatus::Success
            } else {
                CommandStatus::Failure
            };
            CommandOutput {
                status,
                stdout,
                stderr,
                duration,
            }
        }
        Ok(Err(e)) => CommandOutput {
            status: CommandStatus::Failure,
            stdout: String::new(),
            stderr: format!("failed to spawn {program}: {e}"),
            duration,
        },
        Err(_) => CommandOutput {
            status: CommandStatus::Timeout,
            stdout: String::new(),
            stderr: format!("{program} timed out after {}s", timeout.as_secs()),
            duration,
        },
    }
}

/// Run a shell line (`sh -c`) the same way. The target project's build
/// commands are shell lines by nature.
pub async fn run_shell(
    command: &str,
    work_dir: &Path,
    timeout: Duration,
    env: &HashMap<String, String>,
) -> CommandOutput {
    run_command("sh", &["-c", command], work_dir, timeout, env).await
}
