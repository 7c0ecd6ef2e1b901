use clap::Parser;
use std::path::Path;

use deferfs::cli::{self, Args, Commands};
use deferfs::commands;
use deferfs::config::{expand_tilde, load_config};
use deferfs::error;
use deferfs::LocalSession;

fn main() {
    match run() {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> error::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("DEFERFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let Args { root, command } = Args::parse();

    let command = match command {
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            return Ok(0);
        }
        other => other,
    };

    let config = load_config()?;
    let root = root.unwrap_or_else(|| expand_tilde(&config.daemon.get_root()));
    cli::validate_root(&root)?;
    check_paths(&command)?;

    let session = LocalSession::start(&config, &root)?;
    let outcome = dispatch(&session, command, &root);
    let stopped = session.shutdown();
    outcome?;
    stopped?;
    Ok(0)
}

fn check_paths(command: &Commands) -> error::Result<()> {
    let paths: Vec<&str> = match command {
        Commands::Ls { path, .. }
        | Commands::Stat { path, .. }
        | Commands::Cat { path }
        | Commands::Put { path, .. }
        | Commands::Touch { path }
        | Commands::Mkdir { path }
        | Commands::Rm { path }
        | Commands::Rmdir { path } => vec![path.as_str()],
        Commands::Mv { from, to } => vec![from.as_str(), to.as_str()],
        Commands::Config { .. } => vec![],
    };
    paths.into_iter().try_for_each(cli::validate_mount_path)
}

fn dispatch(session: &LocalSession, command: Commands, root: &Path) -> error::Result<()> {
    let mount = session.mount();
    tracing::debug!(root = %root.display(), ?command, "dispatching");
    match command {
        Commands::Ls { path, long, json } => commands::list_dir(mount, &path, long, json),
        Commands::Stat { path, json } => commands::stat_path(mount, &path, json),
        Commands::Cat { path } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            commands::cat_file(mount, &path, &mut out).map(|_| ())
        }
        Commands::Put { local, path } => {
            let written = commands::put_file(mount, &local, &path)?;
            println!("{} bytes written to {}", written, path);
            Ok(())
        }
        Commands::Touch { path } => commands::touch_file(mount, &path),
        Commands::Mkdir { path } => commands::make_dir(mount, &path),
        Commands::Rm { path } => commands::remove_file(mount, &path),
        Commands::Rmdir { path } => commands::remove_dir(mount, &path),
        Commands::Mv { from, to } => commands::rename(mount, &from, &to),
        Commands::Config { action } => commands::handle_config_command(action),
    }
}
