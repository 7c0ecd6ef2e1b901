pub mod config;
pub mod fs;

pub use config::handle_config_command;
pub use fs::{cat_file, list_dir, make_dir, put_file, remove_dir, remove_file, rename, stat_path, touch_file};
