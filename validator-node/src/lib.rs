//! validator-node: coordinator daemon for Sieve validation cycles.
//!
//! The binary wires a [`validator::Validator`] to its collaborators and
//! drives it with a [`validator::CycleScheduler`]. Collaborators come from
//! a simulated [`World`] file.

pub mod fixture;
pub mod sink;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use oracle::WeightSink;
use validator::{CycleReport, CycleScheduler, Validator, ValidatorConfig};

pub use fixture::{Collaborators, FixtureError, World};
pub use sink::JsonLinesSink;

/// Load validator config from YAML, or defaults when the file is absent.
pub async fn load_config(path: &Path) -> anyhow::Result<ValidatorConfig> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(ValidatorConfig::default());
    }
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let config = ValidatorConfig::from_yaml(&yaml)?;
    Ok(config)
}

/// Build a validator for `world`, restoring saved state when present.
pub async fn build_validator(
    world: &World,
    config: ValidatorConfig,
    sink: Option<Arc<dyn WeightSink>>,
    state: Option<&Path>,
) -> anyhow::Result<Arc<Validator>> {
    let collaborators = world.build(config.sampling.time_bucket_width_secs)?;
    let validator = collaborators.validator(config, sink)?;

    if let Some(path) = state {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            validator.load_state(path).await?;
        }
    }
    Ok(Arc::new(validator))
}

/// Run `cycles` back-to-back cycles over every peer of `world`.
pub async fn replay(
    world: &World,
    config: ValidatorConfig,
    cycles: usize,
    state: Option<&Path>,
) -> anyhow::Result<Vec<CycleReport>> {
    let validator = build_validator(world, config, None, state).await?;
    let mut scheduler = CycleScheduler::new(validator);
    if let Some(path) = state {
        scheduler = scheduler.with_state_path(path);
    }
    Ok(scheduler.run_cycles(cycles).await?)
}
