//! Running external collaborators (installer, build tools).

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// True if `marker` appears on either output stream.
    pub fn contains(&self, marker: &str) -> bool {
        self.stdout.contains(marker) || self.stderr.contains(marker)
    }

    /// Both streams, for error messages.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stderr);
        }
        out
    }
}

/// Run `program` to completion and capture its output. A non-zero exit
/// is not an error here; callers decide what success means.
pub async fn run(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<CommandOutput, CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(%program, ?args, cwd = ?cwd, "running command");
    let output = cmd.output().await.map_err(|source| CommandError {
        program: program.to_string(),
        source,
    })?;

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(%program, code = ?result.code, "command finished");
    Ok(result)
}
