use crate::error::{DeferError, Result};
use crate::wire::{MountOpts, REQUEST_HEADER_SIZE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe_secs: Option<u64>,
}

impl PoolConfig {
    pub fn get_channels(&self) -> usize {
        self.channels.unwrap_or_else(super::default_channels)
    }

    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or_else(super::default_buffer_size)
    }

    pub fn get_liveness_probe_secs(&self) -> u64 {
        self.liveness_probe_secs
            .unwrap_or_else(super::default_liveness_probe_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

impl MountConfig {
    pub fn get_base_path(&self) -> String {
        self.base_path
            .clone()
            .unwrap_or_else(super::default_base_path)
    }

    pub fn get_server(&self) -> String {
        self.server.clone().unwrap_or_else(super::default_server)
    }

    pub fn get_user(&self) -> String {
        self.user.clone().unwrap_or_default()
    }

    pub fn get_pass(&self) -> String {
        self.pass.clone().unwrap_or_default()
    }

    pub fn mount_opts(&self) -> Result<MountOpts> {
        MountOpts::new(
            &self.get_base_path(),
            &self.get_server(),
            &self.get_user(),
            &self.get_pass(),
        )
        .map_err(|e| DeferError::Config(format!("Invalid [mount] section: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl DaemonConfig {
    pub fn get_root(&self) -> String {
        self.root.clone().unwrap_or_else(super::default_root)
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or_else(super::default_workers)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Config {
    /// Daemon threads to start: never more than there are channels.
    pub fn effective_workers(&self) -> usize {
        self.daemon.get_workers().min(self.pool.get_channels())
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.pool.get_channels() == 0 {
        return Err(DeferError::Config(
            "pool.channels must be at least 1".to_string(),
        ));
    }

    let min_buffer = REQUEST_HEADER_SIZE + 8;
    if config.pool.get_buffer_size() < min_buffer {
        return Err(DeferError::Config(format!(
            "pool.buffer_size ({}) must be at least {} bytes",
            config.pool.get_buffer_size(),
            min_buffer
        )));
    }

    if config.pool.get_liveness_probe_secs() == 0 {
        return Err(DeferError::Config(
            "pool.liveness_probe_secs must be at least 1".to_string(),
        ));
    }

    if config.daemon.get_workers() == 0 {
        return Err(DeferError::Config(
            "daemon.workers must be at least 1".to_string(),
        ));
    }

    if config.daemon.get_workers() > config.pool.get_channels() {
        eprintln!(
            "Warning: daemon.workers ({}) exceeds pool.channels ({}); extra workers are not started.",
            config.daemon.get_workers(),
            config.pool.get_channels()
        );
    }

    config.mount.mount_opts()?;
    Ok(())
}
