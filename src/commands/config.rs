use crate::cli::ConfigAction;
use crate::config::{get_config_path, load_config, save_config, Config};
use crate::error::Result;

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        Some(ConfigAction::Init) => {
            let config_path = get_config_path()?;
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
            } else {
                save_config(&Config::default())?;
                println!("Created default config at {}", config_path.display());
            }
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            println!("Config file: {}", config_path.display());
            println!();
            println!("Current configuration:");
            println!("  Pool:");
            println!("    channels: {}", config.pool.get_channels());
            println!("    buffer_size: {}", config.pool.get_buffer_size());
            println!(
                "    liveness_probe_secs: {}",
                config.pool.get_liveness_probe_secs()
            );
            println!("  Mount:");
            println!("    base_path: {}", config.mount.get_base_path());
            println!("    server: {}", config.mount.get_server());
            println!("    user: {}", config.mount.get_user());
            let pass = if config.mount.get_pass().is_empty() {
                "(none)"
            } else {
                "(set)"
            };
            println!("    pass: {}", pass);
            println!("  Daemon:");
            println!("    root: {}", config.daemon.get_root());
            println!("    workers: {}", config.daemon.get_workers());
        }
    }
    Ok(())
}
