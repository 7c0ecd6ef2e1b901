//! Cancellation token for blocking waits.
//!
//! A waiter registers the lock it sleeps on, then checks [`Interrupt::is_raised`]
//! while holding that lock. [`Interrupt::raise`] sets the flag first and then
//! takes each registered lock before notifying, so a wakeup cannot slip in
//! between the check and the wait.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Something a blocked thread may be sleeping on.
pub(crate) trait WaitTarget: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct Inner {
    raised: AtomicBool,
    next_key: AtomicU64,
    targets: Mutex<Vec<(u64, Arc<dyn WaitTarget>)>>,
}

#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Abort every current and future wait made with this token.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        let targets: Vec<Arc<dyn WaitTarget>> = self
            .inner
            .targets
            .lock()
            .iter()
            .map(|(_, t)| Arc::clone(t))
            .collect();
        for target in targets {
            target.wake();
        }
    }

    pub(crate) fn register(&self, target: Arc<dyn WaitTarget>) -> Registration<'_> {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner.targets.lock().push((key, target));
        Registration { owner: self, key }
    }
}

/// Removes a wait target again when the wait ends.
pub(crate) struct Registration<'a> {
    owner: &'a Interrupt,
    key: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.owner
            .inner
            .targets
            .lock()
            .retain(|(key, _)| *key != self.key);
    }
}
