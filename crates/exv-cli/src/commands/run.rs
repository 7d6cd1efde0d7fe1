use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use exv_cluster::KubeControlPlane;
use exv_core::{RunOptions, cancel};
use exv_workflow::{
    BatchRunner, CommandBuilder, ExperimentWorkflow, HelmDeployer, WorkflowSettings, render_plan,
};

use crate::RunArgs;
use crate::commands::plan::load;
use crate::signals;

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load(&args.config)?;
    if let Some(n) = args.iterations {
        anyhow::ensure!(n > 0, "--iterations must be at least 1");
        config.batch.iterations = n;
    }
    if let Some(output) = args.output {
        config.batch.output_root = output;
    }

    let options = RunOptions {
        reuse_output: args.reuse_output,
        skip_build: args.skip_build,
        dry_run: args.dry_run,
    };

    let planned = config.planned_experiments();
    print!("{}", render_plan(&planned));

    if options.reuse_output {
        warn!("reuse enabled, existing experiment data will be overwritten");
    }
    if options.dry_run {
        info!(experiments = planned.len(), "dry run, exiting");
        return Ok(());
    }

    let control_plane = KubeControlPlane::try_default(config.cluster.service_kind)
        .await
        .context("failed to connect to the cluster")?;

    let (cancel_tx, cancel_rx) = cancel::channel();
    let signal_task = tokio::spawn(signals::forward(cancel_tx));

    let workflow = ExperimentWorkflow::new(
        Arc::new(control_plane),
        Arc::new(HelmDeployer::new(config.deploy.clone())),
        WorkflowSettings::from_config(&config),
        options,
        cancel_rx.clone(),
    );
    let runner = BatchRunner::new(
        workflow,
        Arc::new(CommandBuilder::new(config.build.clone())),
        config.batch.output_root.clone(),
        config.batch.iterations,
        options,
        cancel_rx,
    );

    info!(
        experiments = planned.len(),
        iterations = config.batch.iterations,
        output = %config.batch.output_root.display(),
        "batch starting"
    );
    let report = runner.run(&planned).await;
    signal_task.abort();

    println!(
        "{} iterations: {} succeeded, {} failed, {} builds failed{}",
        report.iterations.len(),
        report.succeeded(),
        report.failed(),
        report.build_failures.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}
