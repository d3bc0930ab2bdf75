//! `spindle onboard` — write a starter config file.

use spindle_config::AppConfig;

pub async fn run() -> anyhow::Result<()> {
    let path = AppConfig::default_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = AppConfig::default();
    std::fs::write(&path, config.to_toml()?)?;

    println!("Wrote starter config to {}", path.display());
    println!("Set your API key via SPINDLE_API_KEY or the api_key field, then run `spindle chat`.");
    Ok(())
}
