use deferfs::config::{Config, DaemonConfig, MountConfig, PoolConfig};
use deferfs::wire::{Request, RequestKind, Response, REQUEST_HEADER_SIZE};
use deferfs::{Device, Interrupt, LocalSession, MountOpts};
use std::env;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

static CONFIG_ENV: Mutex<()> = Mutex::new(());

/// Get the path to the deferfs binary for testing.
#[allow(dead_code)]
pub fn get_deferfs_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("deferfs").to_path_buf()
}

#[allow(dead_code)]
pub fn small_config(channels: usize, workers: usize, buffer_size: usize) -> Config {
    Config {
        pool: PoolConfig {
            channels: Some(channels),
            buffer_size: Some(buffer_size),
            liveness_probe_secs: Some(1),
        },
        mount: MountConfig::default(),
        daemon: DaemonConfig {
            root: None,
            workers: Some(workers),
        },
    }
}

/// A scratch directory served by an in-process session.
/// Used by various test files - #[allow(dead_code)] because not all tests use all fields.
#[allow(dead_code)]
pub struct TestMount {
    pub session: LocalSession,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestMount {
    pub fn new() -> Self {
        Self::with_config(small_config(4, 2, 64 * 1024))
    }

    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let session = LocalSession::start(&config, dir.path()).expect("Failed to start session");
        Self { session, dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

#[allow(dead_code)]
pub fn getattr_request(path: &str) -> Request {
    Request::new(RequestKind::GetAttr, path, &MountOpts::default())
}

/// Serve exactly one request on `device`, answering with `reply`.
#[allow(dead_code)]
pub fn answer_once(device: &Device, reply: &Response) -> Request {
    let mut buf = vec![0u8; device.capacity()];
    let n = device
        .read(&mut buf, &Interrupt::new())
        .expect("daemon read failed");
    assert!(n >= REQUEST_HEADER_SIZE, "short request of {} bytes", n);
    let request = Request::decode(&buf[..n]).expect("request did not decode");
    let len = reply.encode_into(&mut buf).expect("reply did not encode");
    device.write(&buf[..len]).expect("daemon write failed");
    request
}

#[allow(dead_code)]
pub fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

/// Points `DEFERFS_CONFIG_DIR` at a scratch directory for the lifetime of
/// the context. Contexts are serialized since the variable is process-wide.
#[allow(dead_code)]
pub struct TestConfigContext {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

#[allow(dead_code)]
impl TestConfigContext {
    pub fn new() -> Self {
        let guard = CONFIG_ENV.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");

        env::set_var(
            "DEFERFS_CONFIG_DIR",
            config_dir.to_string_lossy().to_string(),
        );

        Self {
            temp_dir,
            config_dir,
            _guard: guard,
        }
    }

    pub fn write_config(&self, contents: &str) {
        std::fs::create_dir_all(&self.config_dir).expect("Failed to create config dir");
        std::fs::write(self.config_dir.join("config.toml"), contents)
            .expect("Failed to write config");
    }
}

impl Drop for TestConfigContext {
    fn drop(&mut self) {
        env::remove_var("DEFERFS_CONFIG_DIR");
    }
}
