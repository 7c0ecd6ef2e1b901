//! In-process mount: a channel pool, daemon threads serving a local
//! directory, and a [`Mount`] driving requests through them.

use crate::channel::ChannelPool;
use crate::config::Config;
use crate::daemon::{serve, Backend, LocalBackend};
use crate::driver::RequestDriver;
use crate::error::{DeferError, Result};
use crate::interrupt::Interrupt;
use crate::mount::Mount;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

pub struct LocalSession {
    mount: Mount,
    pool: Arc<ChannelPool>,
    shutdown: Interrupt,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl LocalSession {
    pub fn start(config: &Config, root: &Path) -> Result<Self> {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new(root));
        Self::start_with_backend(config, backend)
    }

    pub fn start_with_backend(config: &Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let pool = Arc::new(ChannelPool::from_config(&config.pool)?);
        let shutdown = Interrupt::new();

        let mut session = Self {
            mount: Mount::new(
                config.mount.mount_opts()?,
                RequestDriver::new(Arc::clone(&pool)),
                Interrupt::new(),
            )?,
            pool: Arc::clone(&pool),
            shutdown: shutdown.clone(),
            workers: Vec::new(),
        };

        for _ in 0..config.effective_workers() {
            let device = pool.bind()?;
            let backend = Arc::clone(&backend);
            let intr = shutdown.clone();
            let worker = std::thread::Builder::new()
                .name(format!("deferfs-daemon-{}", device.index()))
                .spawn(move || serve(&device, backend.as_ref(), &intr))
                .map_err(|e| DeferError::Io(format!("failed to start daemon thread: {}", e)))?;
            session.workers.push(worker);
        }
        info!(workers = session.workers.len(), "session started");
        Ok(session)
    }

    pub fn mount(&self) -> &Mount {
        &self.mount
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Stop the daemon threads and report the first failure any of them hit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if self.workers.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.mount.unmount() {
            warn!(error = %e, "nodes still held at shutdown");
        }
        self.shutdown.raise();
        let mut outcome = Ok(());
        for worker in self.workers.drain(..) {
            let result = worker
                .join()
                .unwrap_or_else(|_| Err(DeferError::Io("daemon thread panicked".to_string())));
            if let Err(e) = result {
                warn!(error = %e, "daemon thread failed");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
