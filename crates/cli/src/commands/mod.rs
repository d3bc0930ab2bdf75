pub mod chat;
pub mod onboard;
pub mod servers;

use anyhow::Context;
use spindle_config::AppConfig;
use spindle_registry::{HttpSkillSource, NoSkillSource, SkillSource, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Load the config from the default location.
pub(crate) fn load_config() -> anyhow::Result<AppConfig> {
    let path = AppConfig::default_path();
    AppConfig::load(&path)
        .with_context(|| format!("Failed to load config from {} (run `spindle onboard` first)", path.display()))
}

/// Build the tool registry from config (skill catalog optional).
pub(crate) fn build_registry(config: &AppConfig) -> anyhow::Result<Arc<ToolRegistry>> {
    let source: Arc<dyn SkillSource> = match &config.skills.index_url {
        Some(url) => Arc::new(HttpSkillSource::new(url.clone())?),
        None => Arc::new(NoSkillSource),
    };
    Ok(Arc::new(ToolRegistry::new(
        source,
        Duration::from_secs(config.skills.ttl_secs),
    )))
}

/// Expand a leading `~/` to the home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
