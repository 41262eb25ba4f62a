use tabrelay_core::{Config, Paths};

/// Show the effective configuration as pretty-printed JSON.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let exists = paths.config_file().exists();

    println!();
    println!("Current Configuration");
    println!(
        "  File: {}{}",
        paths.config_file().display(),
        if exists { "" } else { " (not found, using defaults)" }
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub async fn path() -> anyhow::Result<()> {
    println!("{}", Paths::new().config_file().display());
    Ok(())
}

/// Write the default configuration.
pub async fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_path = paths.config_file();
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }
    paths.ensure_dirs()?;
    Config::default().save(&config_path)?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}
