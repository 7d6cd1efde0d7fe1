//! Launch configuration for one load-generator unit.

use std::collections::BTreeMap;
use std::time::Duration;

use exv_cluster::{LabelSelector, UnitSpec};
use exv_core::config::WorkloadConfig;
use exv_core::{ExperimentDefinition, WorkloadProfile, slugify};

/// Label carrying the unit's own name, used to watch exactly one unit.
pub const RUN_LABEL: &str = "exv-run";

/// Kubernetes names are limited to 63 characters.
const MAX_NAME_LEN: usize = 63;

/// Everything needed to launch one unit and bound its wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    /// Defaults merged with overrides; overrides win.
    pub env: BTreeMap<String, String>,
    /// Label shared by every load-generator unit (`app=loadgenerator`).
    pub group_label: (String, String),
    pub avoid_node_label: Option<String>,
    /// Bound on `await_completion`.
    pub timeout: Duration,
}

impl LaunchConfig {
    /// Build the launch config for one iteration of an experiment.
    pub fn for_experiment(
        settings: &WorkloadConfig,
        experiment: &ExperimentDefinition,
        iteration: u32,
    ) -> Self {
        let locustfile = match experiment.profile {
            WorkloadProfile::Standard => settings.locustfile.clone(),
            WorkloadProfile::RampUp => settings
                .rampup_locustfile
                .clone()
                .unwrap_or_else(|| settings.locustfile.clone()),
        };

        let mut env = BTreeMap::new();
        env.insert(
            "LOADGENERATOR_MAX_DAILY_USERS".to_string(),
            settings.max_daily_users.to_string(),
        );
        env.insert(
            "LOADGENERATOR_STAGE_DURATION".to_string(),
            settings.stage_duration().as_secs().to_string(),
        );
        env.insert(
            "LOADGENERATOR_USE_CURRENTTIME".to_string(),
            if settings.use_current_time { "y" } else { "n" }.to_string(),
        );
        env.insert(
            "LOADGENERATOR_ENDPOINT_NAME".to_string(),
            settings.endpoint_name.clone(),
        );
        env.insert("LOCUST_HOST".to_string(), settings.host.clone());
        env.insert("LOCUST_LOCUSTFILE".to_string(), locustfile);

        let overrides = settings.env.iter().map(|(k, v)| (k.clone(), v.clone())).chain(
            experiment
                .workload_env
                .iter()
                .map(|(k, v)| (format!("LOCUST_{k}"), v.clone())),
        );
        env.extend(overrides);

        Self {
            namespace: experiment.namespace.clone(),
            name: unit_name(&settings.label_value, &experiment.id(), iteration),
            image: settings.image.clone(),
            command: settings.command.clone(),
            working_dir: Some(settings.working_dir.clone()).filter(|d| !d.is_empty()),
            env,
            group_label: (settings.label_key.clone(), settings.label_value.clone()),
            avoid_node_label: settings.avoid_node_label.clone(),
            timeout: settings.completion_timeout(),
        }
    }

    /// Selects this unit only.
    pub fn selector(&self) -> LabelSelector {
        LabelSelector::new().with(RUN_LABEL, &self.name)
    }

    /// Selects every load-generator unit.
    pub fn group_selector(&self) -> LabelSelector {
        LabelSelector::new().with(&self.group_label.0, &self.group_label.1)
    }

    pub fn unit_spec(&self) -> UnitSpec {
        let mut labels = BTreeMap::new();
        labels.insert(self.group_label.0.clone(), self.group_label.1.clone());
        labels.insert(RUN_LABEL.to_string(), self.name.clone());
        UnitSpec {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels,
            container_name: self.group_label.1.clone(),
            image: self.image.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            avoid_node_label: self.avoid_node_label.clone(),
        }
    }
}

/// `<prefix>-<experiment>-<iteration>`, cut to a valid object name.
fn unit_name(prefix: &str, experiment_id: &str, iteration: u32) -> String {
    let suffix = format!("-{iteration}");
    let mut base = slugify(&format!("{prefix}-{experiment_id}"));
    base.truncate(MAX_NAME_LEN - suffix.len());
    while base.ends_with('-') {
        base.pop();
    }
    base + &suffix
}
