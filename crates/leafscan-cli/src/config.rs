//! CLI configuration loading

use leafscan_classifiers::{ClassifierConfig, ModelSource};
use std::path::Path;
use tracing::info;

/// Load configuration from file and apply CLI overrides.
///
/// A missing file is not an error; defaults are used instead.
pub fn load(config_path: &Path, cli: &crate::Cli) -> anyhow::Result<ClassifierConfig> {
    let mut config = if config_path.exists() {
        info!(path = %config_path.display(), "Loading configuration");
        ClassifierConfig::from_file(config_path)?
    } else {
        info!(path = %config_path.display(), "Configuration file not found, using defaults");
        ClassifierConfig::default()
    };

    apply_overrides(&mut config, cli);
    config.validate()?;

    Ok(config)
}

fn apply_overrides(config: &mut ClassifierConfig, cli: &crate::Cli) {
    if let Some(url) = &cli.remote_url {
        config.remote.base_url = Some(url.clone());
    }

    if let Some(key) = &cli.anon_key {
        config.remote.anon_key = Some(key.clone());
    }

    if let Some(model) = &cli.model {
        config.model.source = ModelSource::Local {
            path: model.clone(),
        };
    }
}
