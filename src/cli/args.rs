use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "deferfs")]
#[command(
    about = "Run filesystem operations through daemon-backed request channels over a local directory"
)]
pub struct Args {
    #[arg(
        long,
        global = true,
        help = "Directory the daemon serves (defaults to daemon.root from the config)"
    )]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "List a directory")]
    Ls {
        #[arg(default_value = "/", help = "Directory path inside the mount")]
        path: String,

        #[arg(short, long, help = "Show type and size of each entry")]
        long: bool,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Show attributes of a file or directory")]
    Stat {
        #[arg(help = "Path inside the mount")]
        path: String,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Print a file to stdout")]
    Cat {
        #[arg(help = "File path inside the mount")]
        path: String,
    },
    #[command(about = "Copy a local file into the mount")]
    Put {
        #[arg(help = "Local file to read")]
        local: PathBuf,

        #[arg(help = "Destination path inside the mount")]
        path: String,
    },
    #[command(about = "Create an empty file if it does not exist")]
    Touch {
        #[arg(help = "File path inside the mount")]
        path: String,
    },
    #[command(about = "Create a directory")]
    Mkdir {
        #[arg(help = "Directory path inside the mount")]
        path: String,
    },
    #[command(about = "Remove a file")]
    Rm {
        #[arg(help = "File path inside the mount")]
        path: String,
    },
    #[command(about = "Remove an empty directory")]
    Rmdir {
        #[arg(help = "Directory path inside the mount")]
        path: String,
    },
    #[command(about = "Rename a file or directory (not supported)")]
    Mv {
        #[arg(help = "Source path inside the mount")]
        from: String,

        #[arg(help = "Destination path inside the mount")]
        to: String,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
    #[command(about = "Write the default configuration file")]
    Init,
}
