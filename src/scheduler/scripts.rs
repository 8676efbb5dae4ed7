//! Auxiliary Script Loops
//!
//! Each configured script runs on its own timer in its own task. Under
//! the consensus strategy a script only runs while this node leads.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::ScriptConfig;
use crate::election::ElectionCoordinator;
use crate::error::Result;
use crate::system;

/// Spawn one loop per configured script
pub fn spawn_script_loops(
    scripts: &[ScriptConfig],
    coordinator: &Arc<ElectionCoordinator>,
) -> Vec<JoinHandle<()>> {
    scripts
        .iter()
        .filter(|s| !s.script.trim().is_empty())
        .cloned()
        .map(|script| {
            let coordinator = Arc::clone(coordinator);
            tokio::spawn(run_script_loop(script, coordinator))
        })
        .collect()
}

/// Run a script every `run_interval`, forever
pub async fn run_script_loop(script: ScriptConfig, coordinator: Arc<ElectionCoordinator>) {
    let period = script.run_interval();
    tracing::info!("Auxiliary script every {}s: {}", period.as_secs(), script.script);

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;

        if !should_run(&coordinator) {
            continue;
        }
        if let Err(e) = run_script_once(&script).await {
            tracing::error!("Auxiliary script failed: {}", e);
        }
    }
}

fn should_run(coordinator: &ElectionCoordinator) -> bool {
    !coordinator.strategy().gates_auxiliary_work() || coordinator.is_leader()
}

/// Run a script once, logging its output when asked to
pub async fn run_script_once(script: &ScriptConfig) -> Result<()> {
    if script.capture_output {
        let output = system::run_command_output(&script.script, &[]).await?;
        tracing::info!("Auxiliary script output: {}", output);
    } else {
        system::run_command_no_output(&script.script).await?;
    }
    Ok(())
}
