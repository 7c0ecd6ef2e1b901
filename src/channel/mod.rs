//! Rendezvous channels between filesystem callers and daemon threads.
//!
//! A pool owns a fixed set of channels. Filesystem callers `acquire` one,
//! `exchange` a request for a response on it and `release` it again; daemon
//! threads `open` (bind) a channel and serve it through a [`Device`].
//!
//! Channel selection is first-fit. There is no fairness between callers
//! competing for the same channel.

pub mod device;
pub mod poll;

pub use device::Device;
pub use poll::{PollEvents, PollHead};

use crate::config::PoolConfig;
use crate::error::{DeferError, Result};
use crate::interrupt::{Interrupt, WaitTarget};
use crate::wire::{Request, Response, REQUEST_HEADER_SIZE};
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u32 {
        /// A daemon has the channel bound.
        const OPEN = 0x01;
        /// A filesystem caller owns the channel.
        const REQUEST_IN_FLIGHT = 0x02;
        /// A request sits in the buffer and has not been read yet.
        const REQUEST_PENDING = 0x04;
        /// A response is owed by the daemon.
        const DAEMON_WORKING = 0x08;
        /// The daemon went away mid-request.
        const BUFFER_INVALID = 0x10;
        /// The caller stopped waiting for the current request.
        const CANCELLED = 0x20;
    }
}

struct ChannelState {
    flags: ChannelFlags,
    buffer: Vec<u8>,
    used: usize,
    error: i64,
    /// Bumped for every posted request.
    generation: u64,
    /// Generation of the request the daemon last read.
    fetched: u64,
}

pub struct Channel {
    index: usize,
    capacity: usize,
    probe: Duration,
    state: Mutex<ChannelState>,
    cond: Condvar,
    poll: Arc<PollHead>,
}

impl WaitTarget for Channel {
    fn wake(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

impl Channel {
    fn new(index: usize, capacity: usize, probe: Duration) -> Self {
        Self {
            index,
            capacity,
            probe,
            state: Mutex::new(ChannelState {
                flags: ChannelFlags::empty(),
                buffer: vec![0; capacity],
                used: 0,
                error: 0,
                generation: 0,
                fetched: 0,
            }),
            cond: Condvar::new(),
            poll: Arc::new(PollHead::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn flags(&self) -> ChannelFlags {
        self.state.lock().flags
    }

    pub fn is_open(&self) -> bool {
        self.flags().contains(ChannelFlags::OPEN)
    }

    /// Result code recorded by the last daemon write or close.
    pub fn last_error(&self) -> i64 {
        self.state.lock().error
    }

    /// State-based readiness for the daemon side.
    pub fn poll(&self, interest: PollEvents) -> PollEvents {
        let state = self.state.lock();
        let mut ready = PollEvents::empty();
        if state.flags.contains(ChannelFlags::REQUEST_PENDING) {
            ready |= PollEvents::READABLE;
        }
        if state.flags.contains(ChannelFlags::CANCELLED) {
            ready |= PollEvents::ERROR;
        }
        ready & (interest | PollEvents::ERROR)
    }

    fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.flags.contains(ChannelFlags::OPEN) {
            return Err(DeferError::Busy);
        }
        state.flags.insert(ChannelFlags::OPEN);
        self.cond.notify_all();
        Ok(())
    }

    fn exchange(self: &Arc<Self>, request: &Request, intr: &Interrupt) -> Result<Response> {
        if intr.is_raised() {
            return Err(DeferError::Interrupted);
        }
        let _registration = intr.register(Arc::clone(self) as Arc<dyn WaitTarget>);
        let mut state = self.state.lock();
        if !state.flags.contains(ChannelFlags::OPEN) {
            return Err(DeferError::Io(format!(
                "channel {} has no daemon bound",
                self.index
            )));
        }

        let used = request.encode_into(&mut state.buffer)?;
        state.used = used;
        state.error = 0;
        state.generation = state.generation.wrapping_add(1);
        state
            .flags
            .remove(ChannelFlags::BUFFER_INVALID | ChannelFlags::CANCELLED);
        state
            .flags
            .insert(ChannelFlags::REQUEST_PENDING | ChannelFlags::DAEMON_WORKING);
        debug!(
            channel = self.index,
            kind = %request.kind,
            path = %request.path,
            generation = state.generation,
            "request posted"
        );
        self.cond.notify_all();
        self.poll.notify();

        while state.flags.contains(ChannelFlags::DAEMON_WORKING) {
            if intr.is_raised() {
                state.flags.insert(ChannelFlags::CANCELLED);
                drop(state);
                self.poll.notify();
                debug!(channel = self.index, "request cancelled");
                return Err(DeferError::Interrupted);
            }
            let timed_out = self.cond.wait_for(&mut state, self.probe).timed_out();
            if timed_out && state.flags.contains(ChannelFlags::DAEMON_WORKING) {
                warn!(channel = self.index, "daemon not responding, still trying");
                MutexGuard::unlocked(&mut state, || self.poll.notify());
            }
        }

        if state.flags.contains(ChannelFlags::BUFFER_INVALID) {
            return Err(DeferError::Io(format!(
                "daemon on channel {} went away (error {})",
                self.index, state.error
            )));
        }
        Response::decode(&state.buffer[..state.used])
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.flags.remove(
            ChannelFlags::REQUEST_IN_FLIGHT
                | ChannelFlags::BUFFER_INVALID
                | ChannelFlags::REQUEST_PENDING
                | ChannelFlags::CANCELLED,
        );
        self.cond.notify_all();
    }
}

/// Exclusive claim on one channel. Dropping it releases the channel.
pub struct ChannelHandle {
    channel: Arc<Channel>,
}

impl ChannelHandle {
    pub fn index(&self) -> usize {
        self.channel.index
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("channel", &self.channel.index)
            .finish()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.channel.release();
    }
}

pub struct ChannelPool {
    channels: Vec<Arc<Channel>>,
    buffer_size: usize,
    /// Bumped whenever any channel is bound.
    binds: AtomicU64,
}

impl ChannelPool {
    pub fn new(count: usize, buffer_size: usize, probe: Duration) -> Result<Self> {
        if buffer_size < REQUEST_HEADER_SIZE + 8 {
            return Err(DeferError::InvalidArgument(format!(
                "channel buffer of {} bytes cannot hold a request header",
                buffer_size
            )));
        }
        let channels = (0..count)
            .map(|i| Arc::new(Channel::new(i, buffer_size, probe)))
            .collect();
        Ok(Self {
            channels,
            buffer_size,
            binds: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        Self::new(
            config.get_channels(),
            config.get_buffer_size(),
            Duration::from_secs(config.get_liveness_probe_secs()),
        )
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn channel(&self, index: usize) -> Option<&Arc<Channel>> {
        self.channels.get(index)
    }

    pub fn in_flight(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.flags().contains(ChannelFlags::REQUEST_IN_FLIGHT))
            .count()
    }

    pub fn open_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.is_open()).count()
    }

    /// Claim a channel for one request.
    pub fn acquire(&self, intr: &Interrupt) -> Result<ChannelHandle> {
        if self.channels.is_empty() {
            return Err(DeferError::NoChannelsConfigured);
        }
        if intr.is_raised() {
            return Err(DeferError::Interrupted);
        }

        for channel in &self.channels {
            if let Some(mut state) = channel.state.try_lock() {
                if state.flags.contains(ChannelFlags::OPEN)
                    && !state.flags.contains(ChannelFlags::REQUEST_IN_FLIGHT)
                {
                    state.flags.insert(ChannelFlags::REQUEST_IN_FLIGHT);
                    return Ok(self.handle(channel));
                }
            }
        }

        loop {
            let binds = self.binds.load(Ordering::SeqCst);
            match self.channels.iter().find(|c| c.is_open()) {
                Some(channel) => {
                    let _registration =
                        intr.register(Arc::clone(channel) as Arc<dyn WaitTarget>);
                    let mut state = channel.state.lock();
                    while state
                        .flags
                        .contains(ChannelFlags::OPEN | ChannelFlags::REQUEST_IN_FLIGHT)
                    {
                        if intr.is_raised() {
                            return Err(DeferError::Interrupted);
                        }
                        channel.cond.wait(&mut state);
                    }
                    if !state.flags.contains(ChannelFlags::OPEN) {
                        continue;
                    }
                    state.flags.insert(ChannelFlags::REQUEST_IN_FLIGHT);
                    return Ok(self.handle(channel));
                }
                None => {
                    let first = &self.channels[0];
                    let _registration = intr.register(Arc::clone(first) as Arc<dyn WaitTarget>);
                    let mut state = first.state.lock();
                    while !state.flags.contains(ChannelFlags::OPEN)
                        && self.binds.load(Ordering::SeqCst) == binds
                    {
                        if intr.is_raised() {
                            return Err(DeferError::Interrupted);
                        }
                        first.cond.wait(&mut state);
                    }
                }
            }
        }
    }

    fn handle(&self, channel: &Arc<Channel>) -> ChannelHandle {
        debug!(channel = channel.index, "channel acquired");
        ChannelHandle {
            channel: Arc::clone(channel),
        }
    }

    /// Post `request` on the claimed channel and block until the daemon
    /// answers. Slow daemons are probed, never timed out.
    pub fn exchange(
        &self,
        handle: &ChannelHandle,
        request: &Request,
        intr: &Interrupt,
    ) -> Result<Response> {
        handle.channel.exchange(request, intr)
    }

    pub fn release(&self, handle: ChannelHandle) {
        drop(handle);
    }

    /// Bind channel `index` for a daemon.
    pub fn open(&self, index: usize) -> Result<Device> {
        let channel = self.channels.get(index).ok_or_else(|| {
            DeferError::InvalidArgument(format!("no channel {} in a pool of {}", index, self.len()))
        })?;
        channel.open()?;
        self.binds.fetch_add(1, Ordering::SeqCst);
        if index != 0 {
            self.channels[0].wake();
        }
        info!(channel = index, "channel bound");
        Ok(Device::new(Arc::clone(channel)))
    }

    /// Bind the first channel no daemon holds yet.
    pub fn bind(&self) -> Result<Device> {
        for index in 0..self.channels.len() {
            match self.open(index) {
                Err(DeferError::Busy) => continue,
                other => return other,
            }
        }
        Err(DeferError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MountOpts, RequestKind};

    fn pool(count: usize) -> ChannelPool {
        ChannelPool::new(count, 8192, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_empty_pool_has_no_channels() {
        let pool = pool(0);
        assert!(matches!(
            pool.acquire(&Interrupt::new()),
            Err(DeferError::NoChannelsConfigured)
        ));
    }

    #[test]
    fn test_buffer_must_hold_header() {
        assert!(ChannelPool::new(1, REQUEST_HEADER_SIZE, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_open_twice_is_busy() {
        let pool = pool(2);
        let _dev = pool.open(1).unwrap();
        assert!(matches!(pool.open(1), Err(DeferError::Busy)));
        assert!(matches!(pool.open(5), Err(DeferError::InvalidArgument(_))));
    }

    #[test]
    fn test_bind_takes_first_free_channel() {
        let pool = pool(2);
        let a = pool.bind().unwrap();
        let b = pool.bind().unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert!(matches!(pool.bind(), Err(DeferError::Busy)));
        drop(a);
        assert_eq!(pool.bind().unwrap().index(), 0);
    }

    #[test]
    fn test_acquire_skips_in_flight_channels() {
        let pool = pool(3);
        let _d0 = pool.open(0).unwrap();
        let _d2 = pool.open(2).unwrap();
        let intr = Interrupt::new();

        let first = pool.acquire(&intr).unwrap();
        let second = pool.acquire(&intr).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 2);
        assert_eq!(pool.in_flight(), 2);

        pool.release(first);
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.acquire(&intr).unwrap().index(), 0);
    }

    #[test]
    fn test_acquire_without_daemon_is_interruptible() {
        let pool = Arc::new(pool(1));
        let intr = Interrupt::new();
        let waiter = {
            let pool = Arc::clone(&pool);
            let intr = intr.clone();
            std::thread::spawn(move || pool.acquire(&intr).map(|h| h.index()))
        };
        std::thread::sleep(Duration::from_millis(50));
        intr.raise();
        assert_eq!(waiter.join().unwrap(), Err(DeferError::Interrupted));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_acquire_waits_for_bind_on_later_channel() {
        let pool = Arc::new(pool(3));
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire(&Interrupt::new()).map(|h| h.index()))
        };
        std::thread::sleep(Duration::from_millis(50));
        let _dev = pool.open(2).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(2));
    }

    #[test]
    fn test_exchange_on_unbound_channel_fails() {
        let pool = pool(1);
        let dev = pool.open(0).unwrap();
        let handle = pool.acquire(&Interrupt::new()).unwrap();
        dev.close();
        let req = Request::new(RequestKind::GetAttr, "/", &MountOpts::default());
        assert!(matches!(
            pool.exchange(&handle, &req, &Interrupt::new()),
            Err(DeferError::Io(_))
        ));
    }

    #[test]
    fn test_raised_interrupt_posts_nothing() {
        let pool = pool(1);
        let dev = pool.open(0).unwrap();
        let raised = Interrupt::new();
        raised.raise();
        assert_eq!(pool.acquire(&raised).unwrap_err(), DeferError::Interrupted);

        let handle = pool.acquire(&Interrupt::new()).unwrap();
        let req = Request::new(RequestKind::GetAttr, "/", &MountOpts::default());
        assert_eq!(
            pool.exchange(&handle, &req, &raised),
            Err(DeferError::Interrupted)
        );
        assert!(dev.poll(PollEvents::READABLE).is_empty());
        assert!(!pool.channel(0).unwrap().flags().contains(ChannelFlags::DAEMON_WORKING));
    }

    #[test]
    fn test_poll_reports_pending_request() {
        let pool = Arc::new(pool(1));
        let dev = pool.open(0).unwrap();
        assert!(dev.poll(PollEvents::READABLE).is_empty());

        let caller = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || -> Result<Response> {
                let intr = Interrupt::new();
                let handle = pool.acquire(&intr)?;
                let req = Request::new(RequestKind::GetAttr, "/", &MountOpts::default());
                pool.exchange(&handle, &req, &intr)
            })
        };

        let ready = dev
            .poll_wait(PollEvents::READABLE, Some(Duration::from_secs(5)), &Interrupt::new())
            .unwrap();
        assert!(ready.contains(PollEvents::READABLE));

        let mut buf = vec![0u8; 8192];
        dev.read(&mut buf, &Interrupt::new()).unwrap();
        assert!(dev.poll(PollEvents::READABLE).is_empty());

        let reply = Response::ok(RequestKind::GetAttr.as_u64(), Vec::new());
        let n = reply.encode_into(&mut buf).unwrap();
        dev.write(&buf[..n]).unwrap();
        assert_eq!(caller.join().unwrap(), Ok(reply));
    }
}
