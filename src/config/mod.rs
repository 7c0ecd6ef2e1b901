pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

use crate::wire::{DEVICE_BUFFER_SIZE, LIVENESS_PROBE_SECS, MAX_CHANNELS};

fn default_channels() -> usize {
    MAX_CHANNELS
}

fn default_buffer_size() -> usize {
    DEVICE_BUFFER_SIZE
}

fn default_liveness_probe_secs() -> u64 {
    LIVENESS_PROBE_SECS
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_server() -> String {
    "local".to_string()
}

fn default_root() -> String {
    ".".to_string()
}

fn default_workers() -> usize {
    1
}
