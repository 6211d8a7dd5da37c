//! `kindred config` — Configuration management commands.

use kindred_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    // Debug output redacts API keys.
    println!("{config:#?}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("  Config file exists: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created {}", config_path.display());
    println!();
    println!("  Set an API key for at least one provider, e.g.:");
    println!("    export OPENAI_API_KEY=sk-...");
    Ok(())
}
