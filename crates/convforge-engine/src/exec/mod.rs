//! Execution strategies: turning resolved commands into OS processes.
//!
//! Every started process gets a run-scoped sequence number from the
//! [`ProcessCounter`] held by the [`ExecEnv`]. Its stderr always goes to a
//! diagnostic log named after that number; stdout follows the redirect
//! policy of the strategy starting it.

mod launcher;
mod once;

pub use launcher::{LaunchRequest, ProcessLauncher, TokioLauncher};
pub use once::run_once;

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use convforge_common::{Error, Result, Scope};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info};

use crate::context::ContextStore;
use crate::template::{Guard, Template};
use crate::workspace::Workspace;

/// Assigns increasing sequence numbers to started processes.
#[derive(Debug, Clone)]
pub struct ProcessCounter {
    next: u64,
}

impl ProcessCounter {
    /// Start numbering at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Restart numbering at 1.
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for ProcessCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Which strategy started a process; recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Once,
    Pipe,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Pipe => write!(f, "pipe"),
        }
    }
}

/// Human-readable operation identity: declared name plus the pipeline it
/// came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationName {
    pub id: String,
    pub source: String,
}

impl OperationName {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} [{}]", self.id, self.source)
        }
    }
}

/// A command ready to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub name: OperationName,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Declared output file, already resolved against the working directory.
    pub output: Option<PathBuf>,
}

impl ResolvedCommand {
    /// The program path, surrounding quotes stripped.
    pub fn program(&self) -> &str {
        self.argv
            .first()
            .map(|p| p.trim_matches(|c| c == '"' || c == '\''))
            .unwrap_or_default()
    }

    /// Arguments after the program.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Short program name for logs (file name of the program path).
    pub fn display_program(&self) -> String {
        let program = self.program();
        Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| program.to_string())
    }
}

/// An executable operation as declared: command template, optional output
/// template and optional guard.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: OperationName,
    pub template: Template,
    pub output: Option<Template>,
    pub when: Option<Guard>,
}

impl CommandSpec {
    /// Parse the templates of one declared command.
    pub fn parse(
        name: OperationName,
        template: &str,
        output: Option<&str>,
        when: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            name,
            template: Template::parse(template)?,
            output: output.map(Template::parse).transpose()?,
            when: when.map(Guard::parse).transpose()?,
        })
    }

    /// Resolve in a scope. Returns `None` when the guard skips the command.
    pub fn resolve(
        &self,
        store: &mut ContextStore,
        scope: &Scope,
        workspace: &Workspace,
    ) -> Result<Option<ResolvedCommand>> {
        if let Some(guard) = &self.when {
            if !guard.evaluate(store, scope)? {
                debug!(operation = %self.name, %scope, guard = guard.source(), "skipped by guard");
                return Ok(None);
            }
        }

        let argv = self.template.resolve_argv(store, scope)?;
        let output = match &self.output {
            Some(t) => {
                let path = t.render(store, scope)?;
                if path.is_empty() {
                    return Err(Error::template(t.source(), "output resolves to an empty path"));
                }
                Some(workspace.resolve(path))
            }
            None => None,
        };

        Ok(Some(ResolvedCommand {
            name: self.name.clone(),
            argv,
            output,
        }))
    }
}

/// Where a process's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// An OS pipe read by the next stage.
    Pipe,
    /// The operation's declared output file.
    File(PathBuf),
    /// The process's diagnostic log.
    Log,
}

impl Redirect {
    /// The policy shared by both strategies: declared output wins, the last
    /// process of a chain logs, everything else pipes.
    pub fn for_stage(cmd: &ResolvedCommand, is_last: bool) -> Self {
        match &cmd.output {
            Some(path) => Self::File(path.clone()),
            None if is_last => Self::Log,
            None => Self::Pipe,
        }
    }
}

impl fmt::Display for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Log => write!(f, "log"),
        }
    }
}

/// Run-scoped execution state owned by the conversion engine.
pub struct ExecEnv {
    launcher: Arc<dyn ProcessLauncher>,
    workspace: Workspace,
    counter: ProcessCounter,
    dry_run: bool,
}

impl ExecEnv {
    /// Execution environment using [`TokioLauncher`].
    pub fn new(workspace: Workspace) -> Self {
        Self::with_launcher(workspace, Arc::new(TokioLauncher))
    }

    /// Execution environment with a custom launcher.
    pub fn with_launcher(workspace: Workspace, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            workspace,
            counter: ProcessCounter::new(),
            dry_run: false,
        }
    }

    /// Builder: resolve and log commands without starting them.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Restart process numbering at 1.
    pub fn reset_counter(&mut self) {
        self.counter.reset();
    }

    /// Log a command that dry-run mode will not start.
    pub(crate) fn log_dry_run(&self, cmd: &ResolvedCommand, strategy: StrategyKind) {
        info!(
            operation = %cmd.name,
            %strategy,
            program = %cmd.display_program(),
            argv = ?cmd.argv,
            "dry run"
        );
    }

    /// Start one process.
    ///
    /// `stdin_piped` opens a pipe on the child's stdin (otherwise it reads
    /// from the null device). Stderr always goes to the diagnostic log.
    pub(crate) fn start(
        &mut self,
        cmd: &ResolvedCommand,
        strategy: StrategyKind,
        stdin_piped: bool,
        redirect: Redirect,
    ) -> Result<StartedProcess> {
        let seq = self.counter.next_seq();
        let program = cmd.display_program();
        let operation = cmd.name.to_string();
        let log_path = self.workspace.diagnostic_log(seq, &program);

        let spawn_err = |source: std::io::Error| Error::Spawn {
            program: program.clone(),
            operation: operation.clone(),
            source,
        };

        let log = File::create(&log_path).map_err(spawn_err)?;
        let stdout = match &redirect {
            Redirect::Pipe => Stdio::piped(),
            Redirect::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(spawn_err)?;
                }
                Stdio::from(File::create(path).map_err(spawn_err)?)
            }
            Redirect::Log => Stdio::from(log.try_clone().map_err(spawn_err)?),
        };
        let stdin = if stdin_piped {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let child = self
            .launcher
            .launch(LaunchRequest {
                program: cmd.program().to_string(),
                args: cmd.args().to_vec(),
                working_dir: self.workspace.working_dir().to_path_buf(),
                stdin,
                stdout,
                stderr: Stdio::from(log),
            })
            .map_err(spawn_err)?;

        info!(
            seq,
            operation = %operation,
            %strategy,
            program = %program,
            redirect = %redirect,
            log = %log_path.display(),
            "process started"
        );

        Ok(StartedProcess {
            seq,
            operation,
            program,
            strategy,
            redirect,
            child,
        })
    }
}

impl fmt::Debug for ExecEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecEnv")
            .field("workspace", &self.workspace)
            .field("counter", &self.counter)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// A running process and the identity it is logged under.
#[derive(Debug)]
pub struct StartedProcess {
    pub seq: u64,
    pub operation: String,
    pub program: String,
    pub strategy: StrategyKind,
    pub redirect: Redirect,
    child: Child,
}

impl StartedProcess {
    /// Short identity for log lines involving several processes.
    pub fn identity(&self) -> String {
        format!("#{} {} ({})", self.seq, self.program, self.operation)
    }

    pub(crate) fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for exit and log the outcome.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        info!(
            seq = self.seq,
            operation = %self.operation,
            strategy = %self.strategy,
            program = %self.program,
            redirect = %self.redirect,
            %status,
            "process finished"
        );
        Ok(status)
    }

    /// The error for an unsuccessful exit.
    pub fn failure(&self, status: ExitStatus) -> Error {
        Error::ProcessFailed {
            program: self.program.clone(),
            operation: self.operation.clone(),
            status: status.to_string(),
        }
    }
}
