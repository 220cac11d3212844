// src/exec/command.rs

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{Dependencies, TaskProcess};

/// Prefix of the environment variables carrying dependency output.
pub const OUTPUT_ENV_PREFIX: &str = "TASKGRAPH_OUT_";

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything the command wrote to stdout, one `\n` per line.
    pub stdout: String,
    pub exit_code: i32,
}

/// Environment handed to a command: one variable per dependency.
pub type CommandEnv = Vec<(String, String)>;

/// Name of the variable holding `task`'s stdout, e.g.
/// `build-docs` -> `TASKGRAPH_OUT_BUILD_DOCS`.
pub fn output_env_var(task: &str) -> String {
    let suffix: String = task
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{OUTPUT_ENV_PREFIX}{suffix}")
}

/// Process running `cmd` through `sh -c` (`cmd /C` on Windows).
///
/// The stdout of every dependency is exported as
/// [`output_env_var`]`(dependency)`. A non-zero exit status fails the task.
pub fn command_process(name: impl Into<String>, cmd: impl Into<String>) -> TaskProcess {
    let name = name.into();
    let cmd = cmd.into();
    TaskProcess::with_params(collect_dependency_output, move |env: CommandEnv| {
        run_command(name, cmd, env)
    })
}

fn collect_dependency_output(deps: &Dependencies<'_>) -> Result<CommandEnv> {
    deps.names()
        .map(|dep| -> Result<(String, String)> {
            let output = deps.result::<CommandOutput>(dep)?;
            Ok((output_env_var(dep), output.stdout.trim_end().to_string()))
        })
        .collect()
}

async fn run_command(name: String, cmd: String, env: CommandEnv) -> Result<CommandOutput> {
    info!(task = %name, cmd = %cmd, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd);
        c
    };

    command
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{name}'"))?;

    let stdout = child
        .stdout
        .take()
        .with_context(|| format!("capturing stdout of task '{name}'"))?;
    let stderr = child.stderr.take();

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = stderr {
        let task_name = name.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Ok(read) = reader.read_until(b'\n', &mut buf).await {
                if read == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                debug!(task = %task_name, "stderr: {}", line.trim_end_matches(['\n', '\r']));
                buf.clear();
            }
        });
    }

    // Raw bytes: a command printing invalid UTF-8 still succeeds.
    let mut captured = String::new();
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("reading stdout of task '{name}'"))?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        info!(task = %name, "stdout: {}", line);
        captured.push_str(line);
        captured.push('\n');
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{name}'"))?;

    let code = status.code().unwrap_or(-1);
    info!(
        task = %name,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        bail!("command `{cmd}` exited with status {code}");
    }

    Ok(CommandOutput {
        stdout: captured,
        exit_code: code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names_are_shell_safe() {
        assert_eq!(output_env_var("build"), "TASKGRAPH_OUT_BUILD");
        assert_eq!(output_env_var("build-docs"), "TASKGRAPH_OUT_BUILD_DOCS");
        assert_eq!(output_env_var("a.b c"), "TASKGRAPH_OUT_A_B_C");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run_command("echo".into(), "echo hello; echo world".into(), vec![])
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\nworld\n");
        assert_eq!(output.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exports_dependency_env() {
        let env = vec![(output_env_var("fetch"), "v1.2".to_string())];
        let output = run_command(
            "print".into(),
            "echo \"got $TASKGRAPH_OUT_FETCH\"".into(),
            env,
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "got v1.2\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_is_decoded_lossily() {
        let output = run_command("bin".into(), r"printf '\377\376\nok'".into(), vec![])
            .await
            .unwrap();
        assert_eq!(output.stdout, "\u{FFFD}\u{FFFD}\nok\n");
        assert_eq!(output.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails() {
        let err = run_command("fail".into(), "echo partial; exit 3".into(), vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with status 3"), "{err}");
    }
}
