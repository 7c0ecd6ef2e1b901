//! Daemon end of a channel.

use super::{Channel, ChannelFlags, PollEvents};
use crate::error::{DeferError, Result};
use crate::interrupt::{Interrupt, WaitTarget};
use crate::wire::{ResponseHeader, REQUEST_HEADER_SIZE};
use parking_lot::Condvar;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A bound channel as seen by a daemon thread. Dropping it unbinds.
pub struct Device {
    channel: Arc<Channel>,
    closed: bool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("channel", &self.channel.index)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Device {
    pub(super) fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            closed: false,
        }
    }

    pub fn index(&self) -> usize {
        self.channel.index
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity
    }

    /// Block until a request is pending and copy it into `buf`.
    pub fn read(&self, buf: &mut [u8], intr: &Interrupt) -> Result<usize> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(DeferError::InvalidArgument(format!(
                "read buffer of {} bytes is smaller than a request header",
                buf.len()
            )));
        }
        let channel = &self.channel;
        let _registration = intr.register(Arc::clone(channel) as Arc<dyn WaitTarget>);
        let mut state = channel.state.lock();
        while !state.flags.contains(ChannelFlags::REQUEST_PENDING) {
            if intr.is_raised() {
                return Err(DeferError::Interrupted);
            }
            channel.cond.wait(&mut state);
        }

        let n = buf.len().min(state.used);
        buf[..n].copy_from_slice(&state.buffer[..n]);
        state.flags.remove(ChannelFlags::REQUEST_PENDING);
        state.fetched = state.generation;
        debug!(channel = channel.index, bytes = n, "request fetched");
        Ok(n)
    }

    /// Deliver the response to the request last read. Responses that no
    /// longer match the posted request are dropped with `StaleResponse`.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let channel = &self.channel;
        if buf.len() > channel.capacity {
            return Err(DeferError::InvalidArgument(format!(
                "response of {} bytes exceeds the {} byte channel buffer",
                buf.len(),
                channel.capacity
            )));
        }
        let header = ResponseHeader::from_bytes(buf)?;

        let mut state = channel.state.lock();
        if !state.flags.contains(ChannelFlags::DAEMON_WORKING)
            || state.fetched != state.generation
        {
            warn!(
                channel = channel.index,
                fetched = state.fetched,
                current = state.generation,
                "discarding stale response"
            );
            return Err(DeferError::StaleResponse);
        }

        state.buffer[..buf.len()].copy_from_slice(buf);
        state.used = buf.len();
        state.error = header.result;
        state.flags.remove(ChannelFlags::DAEMON_WORKING);
        channel.cond.notify_all();
        debug!(channel = channel.index, result = header.result, "response delivered");
        Ok(buf.len())
    }

    pub fn poll(&self, interest: PollEvents) -> PollEvents {
        self.channel.poll(interest)
    }

    /// Wait until `poll(interest)` reports something. Returns an empty set
    /// when `timeout` runs out first.
    pub fn poll_wait(
        &self,
        interest: PollEvents,
        timeout: Option<Duration>,
        intr: &Interrupt,
    ) -> Result<PollEvents> {
        let head = &self.channel.poll;
        let _registration = intr.register(Arc::clone(head) as Arc<dyn WaitTarget>);
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let seen = head.current();
            let ready = self.poll(interest);
            if !ready.is_empty() {
                return Ok(ready);
            }

            let cond: &Condvar = head.cond();
            let mut seq = head.lock();
            while *seq == seen {
                if intr.is_raised() {
                    return Err(DeferError::Interrupted);
                }
                match deadline {
                    Some(deadline) => {
                        if cond.wait_until(&mut seq, deadline).timed_out() {
                            return Ok(PollEvents::empty());
                        }
                    }
                    None => cond.wait(&mut seq),
                }
            }
        }
    }

    /// Unbind the channel. A caller still waiting for a response is woken
    /// with an I/O error.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let channel = &self.channel;
        {
            let mut state = channel.state.lock();
            if state.flags.contains(ChannelFlags::DAEMON_WORKING) {
                state.flags.remove(ChannelFlags::DAEMON_WORKING);
                state.flags.insert(ChannelFlags::BUFFER_INVALID);
                state.error = i64::from(libc::EIO);
            }
            state.flags.remove(ChannelFlags::OPEN);
            channel.cond.notify_all();
        }
        channel.poll.notify();
        info!(channel = channel.index, "channel unbound");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}
