mod common;

use common::TestConfigContext;
use deferfs::config::{get_config_path, save_config};
use deferfs::{load_config, DeferError};

#[test]
fn test_load_config_creates_default_file() {
    let ctx = TestConfigContext::new();

    let config = load_config().expect("Failed to load config");
    assert_eq!(config.pool.get_channels(), 10);
    assert_eq!(config.pool.get_buffer_size(), 1024 * 1024);
    assert_eq!(config.pool.get_liveness_probe_secs(), 10);
    assert_eq!(config.mount.get_base_path(), "/");
    assert_eq!(config.daemon.get_workers(), 1);

    assert!(
        ctx.config_dir.join("config.toml").exists(),
        "default config should be written when DEFERFS_CONFIG_DIR is set"
    );
    assert_eq!(
        get_config_path().unwrap(),
        ctx.config_dir.join("config.toml")
    );
}

#[test]
fn test_save_config_round_trips_settings() {
    let _ctx = TestConfigContext::new();

    let mut config = load_config().expect("Failed to load config");
    config.pool.channels = Some(3);
    config.mount.server = Some("files.example".to_string());
    config.daemon.root = Some("/srv/export".to_string());
    save_config(&config).expect("Failed to save config");

    let reloaded = load_config().expect("Failed to reload config");
    assert_eq!(reloaded.pool.get_channels(), 3);
    assert_eq!(reloaded.mount.get_server(), "files.example");
    assert_eq!(reloaded.daemon.get_root(), "/srv/export");
    assert_eq!(
        reloaded.pool.get_buffer_size(),
        1024 * 1024,
        "unset fields keep their defaults"
    );
}

#[test]
fn test_partial_config_fills_defaults() {
    let ctx = TestConfigContext::new();
    ctx.write_config("[pool]\nchannels = 2\n");

    let config = load_config().expect("Failed to load config");
    assert_eq!(config.pool.get_channels(), 2);
    assert_eq!(config.effective_workers(), 1);
    assert_eq!(config.mount.get_server(), "local");
}

#[test]
fn test_invalid_values_are_rejected() {
    let ctx = TestConfigContext::new();

    ctx.write_config("[pool]\nchannels = 0\n");
    assert!(matches!(load_config(), Err(DeferError::Config(_))));

    ctx.write_config("[pool]\nbuffer_size = 64\n");
    assert!(matches!(load_config(), Err(DeferError::Config(_))));

    let long_server = "s".repeat(200);
    ctx.write_config(&format!("[mount]\nserver = \"{}\"\n", long_server));
    assert!(matches!(load_config(), Err(DeferError::Config(_))));
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let ctx = TestConfigContext::new();
    ctx.write_config("[pool\nchannels = ");

    match load_config() {
        Err(DeferError::Config(msg)) => assert!(msg.contains("parse"), "got {}", msg),
        other => panic!("expected a parse error, got {:?}", other),
    }
}
