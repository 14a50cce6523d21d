//! Pipe orchestration: cycle groups feeding persistent tail stages.
//!
//! A pipe is run as follows:
//!
//! 1. Every tail stage is started once, chained to its neighbours by copy
//!    loops that live as long as the pipe.
//! 2. Without cycle groups the tail alone is the pipeline; the orchestrator
//!    waits for its first process.
//! 3. Otherwise each cycle group is started in turn, chained internally and
//!    bridged into the first tail stage. The orchestrator waits for the
//!    group's first process, lets the copy loops drain, reaps the rest of
//!    the group and gets the tail's input back for the next group.
//! 4. Finally the tail's input is closed and the tail processes are reaped.
//!
//! Only the first process of each pipeline decides success. A copy loop
//! that hits an I/O error closes both of its ends and logs both process
//! identities; it never fails the pipe by itself.

use convforge_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::exec::{
    ExecEnv, OperationName, Redirect, ResolvedCommand, StartedProcess, StrategyKind,
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A pipe operation with guards applied and templates resolved.
#[derive(Debug, Clone)]
pub struct PipePlan {
    pub name: OperationName,
    /// Cycle groups in execution order. Empty groups are not allowed.
    pub cycles: Vec<Vec<ResolvedCommand>>,
    /// Stages kept alive across all cycles.
    pub tail: Vec<ResolvedCommand>,
}

/// Run a pipe plan to completion.
pub async fn run_pipe(env: &mut ExecEnv, plan: PipePlan) -> Result<()> {
    if plan.tail.is_empty() {
        debug!(operation = %plan.name, "every tail stage skipped, nothing to run");
        return Ok(());
    }
    if plan.cycles.iter().any(Vec::is_empty) {
        return Err(Error::internal(format!(
            "pipe {} contains an empty cycle group",
            plan.name
        )));
    }

    if env.is_dry_run() {
        for cmd in plan.cycles.iter().flatten().chain(&plan.tail) {
            env.log_dry_run(cmd, StrategyKind::Pipe);
        }
        return Ok(());
    }

    let has_cycles = !plan.cycles.is_empty();
    let mut tail = start_chain(env, &plan.tail, has_cycles, true)?;
    let tail_links = link_chain(&mut tail);

    let result = if has_cycles {
        let tail_head = tail[0].identity();
        let mut tail_input = tail[0].take_stdin();
        let mut outcome = Ok(());
        for group in &plan.cycles {
            if let Err(e) = run_cycle(env, group, &mut tail_input, &tail_head).await {
                outcome = Err(e);
                break;
            }
        }
        // Closing the tail's input lets it drain and exit.
        drop(tail_input);
        outcome
    } else {
        wait_first(&mut tail[0]).await
    };

    let skip = usize::from(!has_cycles);
    release(&mut tail[skip..]).await;
    join_links(tail_links).await;

    result
}

/// Run one cycle group into the tail's input.
async fn run_cycle(
    env: &mut ExecEnv,
    group: &[ResolvedCommand],
    tail_input: &mut Option<ChildStdin>,
    tail_head: &str,
) -> Result<()> {
    let mut procs = start_chain(env, group, false, false)?;
    let links = link_chain(&mut procs);

    let bridge = bridge_to_tail(procs.last_mut(), tail_input.take(), tail_head);
    let first = wait_first(&mut procs[0]).await;

    join_links(links).await;
    if let Some(bridge) = bridge {
        *tail_input = match bridge.await {
            Ok(writer) => writer,
            Err(e) => {
                warn!(error = %e, "bridge copy task failed");
                None
            }
        };
    }
    release(&mut procs[1..]).await;

    first
}

/// Start the processes of one chain.
///
/// `head_input` pipes the first stage's stdin. `ends_chain` marks the last
/// stage as the end of the whole pipeline (its stdout goes to the log).
fn start_chain(
    env: &mut ExecEnv,
    cmds: &[ResolvedCommand],
    head_input: bool,
    ends_chain: bool,
) -> Result<Vec<StartedProcess>> {
    let mut procs = Vec::with_capacity(cmds.len());
    for (i, cmd) in cmds.iter().enumerate() {
        let is_last = ends_chain && i + 1 == cmds.len();
        let stdin = if i == 0 { head_input } else { true };
        let redirect = Redirect::for_stage(cmd, is_last);
        // Already started processes are killed on drop if this fails.
        procs.push(env.start(cmd, StrategyKind::Pipe, stdin, redirect)?);
    }
    Ok(procs)
}

/// Start a copy loop between every adjacent pair of processes.
fn link_chain(procs: &mut [StartedProcess]) -> Vec<JoinHandle<()>> {
    let mut links = Vec::new();
    for i in 1..procs.len() {
        let (upstream, downstream) = procs.split_at_mut(i);
        let upstream = &mut upstream[i - 1];
        let downstream = &mut downstream[0];

        let writer = downstream.take_stdin();
        let Some(reader) = upstream.take_stdout() else {
            // Upstream writes to its own file; downstream sees EOF at once.
            debug!(
                upstream = %upstream.identity(),
                downstream = %downstream.identity(),
                "upstream has a file output, closing downstream input"
            );
            continue;
        };
        let Some(writer) = writer else {
            continue;
        };

        let from = upstream.identity();
        let to = downstream.identity();
        links.push(tokio::spawn(async move {
            copy_stream(reader, writer, &from, &to).await;
        }));
    }
    links
}

/// Copy the last cycle stage's output into the tail, handing the tail's
/// input back once the cycle reaches end of stream.
fn bridge_to_tail(
    last: Option<&mut StartedProcess>,
    tail_input: Option<ChildStdin>,
    tail_head: &str,
) -> Option<JoinHandle<Option<ChildStdin>>> {
    let last = last?;
    let Some(reader) = last.take_stdout() else {
        // The cycle wrote to a file; the tail keeps its input for later.
        return Some(tokio::spawn(async move { tail_input }));
    };
    let Some(writer) = tail_input else {
        debug!(upstream = %last.identity(), "tail input already closed, dropping cycle output");
        return None;
    };

    let from = last.identity();
    let to = tail_head.to_string();
    Some(tokio::spawn(async move {
        copy_stream(reader, writer, &from, &to).await
    }))
}

/// Copy bytes until end of stream.
///
/// Returns the writer on clean EOF. On an I/O error both ends are dropped,
/// which closes them, and `None` is returned.
async fn copy_stream<R, W>(mut reader: R, mut writer: W, from: &str, to: &str) -> Option<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(upstream = %from, downstream = %to, error = %e, "pipe read failed");
                return None;
            }
        };
        let written = match writer.write_all(&buf[..n]).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(upstream = %from, downstream = %to, error = %e, "pipe write failed");
            return None;
        }
        total += n as u64;
    }
    debug!(upstream = %from, downstream = %to, bytes = total, "pipe drained");
    Some(writer)
}

/// Wait for the first process of a pipeline; its exit decides success.
async fn wait_first(process: &mut StartedProcess) -> Result<()> {
    let status = process.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(process.failure(status))
    }
}

/// Reap processes that should exit once their input closes.
///
/// Exit failures here are logged, not propagated.
async fn release(procs: &mut [StartedProcess]) {
    for process in procs {
        match process.wait().await {
            Ok(status) if !status.success() => {
                warn!(process = %process.identity(), %status, "pipe stage exited unsuccessfully");
            }
            Ok(_) => {}
            Err(e) => warn!(process = %process.identity(), error = %e, "failed to reap pipe stage"),
        }
    }
}

async fn join_links(links: Vec<JoinHandle<()>>) {
    for link in links {
        if let Err(e) = link.await {
            warn!(error = %e, "copy task failed");
        }
    }
}
