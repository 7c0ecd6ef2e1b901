use crate::channel::ChannelPool;
use crate::error::{DeferError, Result};
use crate::interrupt::Interrupt;
use crate::wire::{Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Filesystem-facing entry point: one request in, one response out.
#[derive(Clone)]
pub struct RequestDriver {
    pool: Arc<ChannelPool>,
}

impl RequestDriver {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Largest payload a response can carry on this pool.
    pub fn payload_capacity(&self) -> usize {
        self.pool.buffer_size() - crate::wire::RESPONSE_HEADER_SIZE
    }

    pub fn perform(&self, request: &Request, intr: &Interrupt) -> Result<Response> {
        let handle = self.pool.acquire(intr)?;
        let response = self.pool.exchange(&handle, request, intr);
        self.pool.release(handle);
        let response = response?;

        if response.kind != request.kind.as_u64() {
            return Err(DeferError::Io(format!(
                "{} request answered with kind {}",
                request.kind, response.kind
            )));
        }
        debug!(kind = %request.kind, path = %request.path, result = response.result, "request done");
        match response.result {
            0 => Ok(response),
            code => Err(DeferError::from_errno(code)),
        }
    }
}
