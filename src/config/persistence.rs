use crate::error::{DeferError, Result};
use std::io::IsTerminal;

use crate::config::paths::*;
use crate::config::schema::*;

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    let config_path = config_dir.join("config.toml");

    let config = if !config_path.exists() {
        let is_explicit_config_dir = std::env::var("DEFERFS_CONFIG_DIR").is_ok();
        let is_non_interactive = !std::io::stdin().is_terminal();

        if is_explicit_config_dir || is_non_interactive {
            std::fs::create_dir_all(&config_dir).map_err(|e| {
                DeferError::Config(format!(
                    "Failed to create config directory {}: {}",
                    config_dir.display(),
                    e
                ))
            })?;
            let toml_str = toml::to_string_pretty(&Config::default())
                .map_err(|e| DeferError::Config(format!("Failed to serialize config: {}", e)))?;
            std::fs::write(&config_path, toml_str)
                .map_err(|e| DeferError::Config(format!("Failed to write config file: {}", e)))?;

            tracing::info!(path = %config_path.display(), "created default config");
        }

        Config::default()
    } else {
        let toml_content = std::fs::read_to_string(&config_path)
            .map_err(|e| DeferError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&toml_content)
            .map_err(|e| DeferError::Config(format!("Failed to parse config: {}", e)))?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DeferError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| DeferError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(&config_path, toml_str)
        .map_err(|e| DeferError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
