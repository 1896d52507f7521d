//! Subprocess collaborators behind one seam.
//!
//! The orchestrator drives three external tools: the version-control
//! client (`git clone`), the dependency installer (`npm install`) and the
//! scene compiler (`dcl build`). All three are opaque subprocesses; the
//! [`Toolchain`] trait is the only thing the rest of the crate sees, so
//! tests substitute recording doubles the same way skills are substituted
//! behind a trait in other runtimes.
//!
//! No timeouts are imposed: a hung compiler hangs the run.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// What to do with a subprocess's stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Discard all output (dependency installs).
    Silent,
    /// Stream to the parent's stdio (clone progress).
    Inherit,
    /// Buffer and surface only in the error message on non-zero exit
    /// (compiler runs).
    OnError,
}

struct CommandOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Runs one subprocess to completion in `workdir`.
///
/// `NODE_ENV` is cleared for every child: an inherited `production`
/// value would make npm skip dev dependencies the builds rely on.
async fn run_command(
    workdir: &Path,
    program: &str,
    args: &[&str],
    capture: Capture,
) -> Result<CommandOutput> {
    debug!("run> {} {} (in {})", program, args.join(" "), workdir.display());

    let mut command = tokio::process::Command::new(program);
    command.args(args).current_dir(workdir).env("NODE_ENV", "");

    let output = match capture {
        Capture::Silent => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
            let status = command.status().await?;
            CommandOutput {
                code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: String::new(),
            }
        }
        Capture::Inherit => {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let status = command.status().await?;
            CommandOutput {
                code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: String::new(),
            }
        }
        Capture::OnError => {
            let out = command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await?;
            CommandOutput {
                code: out.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            }
        }
    };

    Ok(output)
}

/// The three collaborators the build orchestrator shells out to.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Shallow-clones `url` into `dest` (a specific branch if given).
    async fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()>;

    /// Installs the dependencies declared in `workdir`'s package.json.
    async fn install(&self, workdir: &Path) -> Result<()>;

    /// Installs one extra package into `workdir`.
    async fn install_package(&self, workdir: &Path, package: &str) -> Result<()>;

    /// Compiles the scene in `workdir`.
    async fn build(&self, workdir: &Path) -> Result<()>;
}

/// Production toolchain: `git`, `npm` and `dcl` on `$PATH`.
pub struct CommandToolchain;

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn clone_repo(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        let workdir = dest.parent().unwrap_or_else(|| Path::new("."));
        let dest_str = dest.to_string_lossy();

        let mut args = vec!["clone", "--depth", "1"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url, dest_str.as_ref()]);

        let output = run_command(workdir, "git", &args, Capture::Inherit).await?;
        if output.code != 0 {
            return Err(Error::Acquisition(format!(
                "git clone of {url} exited with code {}",
                output.code
            )));
        }
        Ok(())
    }

    async fn install(&self, workdir: &Path) -> Result<()> {
        let output = run_command(workdir, "npm", &["install"], Capture::Silent).await?;
        if output.code != 0 {
            return Err(Error::Build(format!(
                "npm install exited with code {} in {}",
                output.code,
                workdir.display()
            )));
        }
        Ok(())
    }

    async fn install_package(&self, workdir: &Path, package: &str) -> Result<()> {
        let output = run_command(workdir, "npm", &["install", package], Capture::Silent).await?;
        if output.code != 0 {
            return Err(Error::Build(format!(
                "npm install {package} exited with code {} in {}",
                output.code,
                workdir.display()
            )));
        }
        Ok(())
    }

    async fn build(&self, workdir: &Path) -> Result<()> {
        let output = run_command(workdir, "dcl", &["build"], Capture::OnError).await?;
        if output.code != 0 {
            return Err(Error::Build(format!(
                "dcl build exited with code {} in {}\n> Standard output:\n{}\n> Error output:\n{}",
                output.code,
                workdir.display(),
                output.stdout,
                output.stderr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_success() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_command(dir.path(), "true", &[], Capture::Silent)
            .await
            .unwrap();
        assert_eq!(output.code, 0);
    }

    #[tokio::test]
    async fn test_run_command_captures_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_command(
            dir.path(),
            "sh",
            &["-c", "echo compiled 0 files; echo type mismatch >&2; exit 3"],
            Capture::OnError,
        )
        .await
        .unwrap();
        assert_eq!(output.code, 3);
        assert!(output.stdout.contains("compiled 0 files"));
        assert!(output.stderr.contains("type mismatch"));
    }

    #[tokio::test]
    async fn test_run_command_silent_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_command(dir.path(), "sh", &["-c", "echo noisy"], Capture::Silent)
            .await
            .unwrap();
        assert_eq!(output.code, 0);
        assert!(output.stdout.is_empty());
    }
}
