use crate::interrupt::WaitTarget;
use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

bitflags! {
    /// Readiness reported to the daemon by `poll`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollEvents: u16 {
        /// A request is waiting to be read.
        const READABLE = 0x0001;
        /// The caller waiting on the current request gave up.
        const ERROR = 0x0008;
    }
}

/// Wakeup point for daemon threads sleeping in `poll_wait`.
///
/// Readiness itself is derived from channel state; the head only carries a
/// sequence number so sleepers can tell that something changed.
#[derive(Default)]
pub struct PollHead {
    seq: Mutex<u64>,
    cond: Condvar,
}

impl PollHead {
    pub fn notify(&self) {
        let mut seq = self.seq.lock();
        *seq = seq.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn current(&self) -> u64 {
        *self.seq.lock()
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, u64> {
        self.seq.lock()
    }

    pub(crate) fn cond(&self) -> &Condvar {
        &self.cond
    }
}

impl WaitTarget for PollHead {
    fn wake(&self) {
        let _seq = self.seq.lock();
        self.cond.notify_all();
    }
}
