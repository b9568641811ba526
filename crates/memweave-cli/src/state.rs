//! Configuration and secrets resolved once per invocation.

use std::path::{Path, PathBuf};

use memweave_infra::config::{Secrets, apply_env_overrides, default_config_path, load_config};
use memweave_types::config::PipelineConfig;

pub struct AppState {
    pub config: PipelineConfig,
    pub secrets: Secrets,
    pub config_path: PathBuf,
}

impl AppState {
    /// Load the config file (or defaults), then apply environment overrides.
    pub async fn init(config_path: Option<&Path>) -> Self {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        let mut config = load_config(&config_path).await;
        apply_env_overrides(&mut config);
        tracing::debug!(
            path = %config_path.display(),
            backend = %config.store.backend,
            model = %config.judgment.model,
            "configuration loaded"
        );

        Self {
            config,
            secrets: Secrets::from_env(),
            config_path,
        }
    }
}
