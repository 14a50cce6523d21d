//! The run-once strategy.

use convforge_common::Result;

use super::{ExecEnv, Redirect, ResolvedCommand, StrategyKind};

/// Start one process, wait for it, and fail on spawn error or non-zero
/// exit.
///
/// Stdout goes to the declared output file, or to the diagnostic log when
/// the command declares none.
pub async fn run_once(env: &mut ExecEnv, cmd: &ResolvedCommand) -> Result<()> {
    if env.is_dry_run() {
        env.log_dry_run(cmd, StrategyKind::Once);
        return Ok(());
    }

    let mut process = env.start(cmd, StrategyKind::Once, false, Redirect::for_stage(cmd, true))?;
    let status = process.wait().await?;
    if !status.success() {
        return Err(process.failure(status));
    }
    Ok(())
}
