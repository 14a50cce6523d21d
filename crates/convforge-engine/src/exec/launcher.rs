//! Process launch collaborator.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Everything needed to start one OS process.
pub struct LaunchRequest {
    /// Program path or name, quotes already stripped.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Current directory of the new process.
    pub working_dir: PathBuf,
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

/// Starts OS processes for the execution strategies.
///
/// The default implementation is [`TokioLauncher`]; tests substitute
/// wrappers that record or reject launches.
pub trait ProcessLauncher: Send + Sync {
    /// Start a process and hand back its handle.
    fn launch(&self, request: LaunchRequest) -> io::Result<Child>;
}

/// Launches processes with [`tokio::process::Command`].
///
/// Children are killed if their handle is dropped before they exit, so an
/// aborted conversion leaves no orphans behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, request: LaunchRequest) -> io::Result<Child> {
        Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(request.stdin)
            .stdout(request.stdout)
            .stderr(request.stderr)
            .kill_on_drop(true)
            .spawn()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn request(program: &str, args: &[&str]) -> LaunchRequest {
        LaunchRequest {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: std::env::temp_dir(),
            stdin: Stdio::null(),
            stdout: Stdio::piped(),
            stderr: Stdio::null(),
        }
    }

    #[tokio::test]
    async fn test_launches_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("pwd", &[]);
        req.working_dir = dir.path().to_path_buf();

        let mut child = TokioLauncher.launch(req).unwrap();
        let mut out = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert!(child.wait().await.unwrap().success());

        let reported = std::fs::canonicalize(out.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let result = TokioLauncher.launch(request("nonexistent_tool_xyz_12345", &[]));
        assert!(result.is_err());
    }
}
