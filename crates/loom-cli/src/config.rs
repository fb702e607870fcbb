//! Config loading — same shape as `sa-gateway::cli::load_config`: read a
//! TOML file named by an environment variable (or a sensible default
//! path), falling back to `PipelineConfig::default()` when no file is
//! present so the binary runs with zero setup.

use loom_domain::config::PipelineConfig;

const CONFIG_ENV_VAR: &str = "LOOM_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "loom.toml";

pub fn load_config() -> anyhow::Result<(PipelineConfig, String)> {
    let config_path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        PipelineConfig::default()
    };

    Ok((config, config_path))
}
