use std::path::Path;

use anyhow::Context;

use exv_core::ExperimentsConfig;
use exv_workflow::render_plan;

/// Load the configuration and print the planned experiments.
pub fn plan(config_path: &Path) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let planned = config.planned_experiments();
    print!("{}", render_plan(&planned));
    println!(
        "{} experiments x {} iterations",
        planned.len(),
        config.batch.iterations
    );
    Ok(())
}

pub fn load(config_path: &Path) -> anyhow::Result<ExperimentsConfig> {
    ExperimentsConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))
}
