//! Reader-priority send lock: a normal mutex plus an atomic flag the
//! reader sets while it wants to inject a response for the message it is
//! currently handling. Any other acquirer backs off and retries while the
//! flag is set, so the reader always wins the next lock acquisition without
//! outright starving everyone else.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub struct SendGate {
    mutex: Mutex<()>,
    priority_requested: AtomicBool,
}

impl SendGate {
    pub fn new() -> Self {
        Self { mutex: Mutex::new(()), priority_requested: AtomicBool::new(false) }
    }

    /// Reader-side acquire. Raises the priority flag before blocking on the
    /// mutex so concurrent [`acquire_normal`](Self::acquire_normal) callers
    /// yield to it.
    pub fn acquire_priority(&self) -> SendGuard<'_> {
        self.priority_requested.store(true, Ordering::SeqCst);
        let guard = self.mutex.lock();
        SendGuard { _guard: guard, gate: self, is_priority: true }
    }

    /// Any sender outside the reader path (a signal emitted from a timer, a
    /// forwarded message). Spins while a priority acquire is in flight.
    pub fn acquire_normal(&self) -> SendGuard<'_> {
        loop {
            if self.priority_requested.load(Ordering::SeqCst) {
                std::thread::yield_now();
                continue;
            }
            let guard = self.mutex.lock();
            if self.priority_requested.load(Ordering::SeqCst) {
                drop(guard);
                std::thread::yield_now();
                continue;
            }
            return SendGuard { _guard: guard, gate: self, is_priority: false };
        }
    }
}

impl Default for SendGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SendGuard<'a> {
    _guard: parking_lot::MutexGuard<'a, ()>,
    gate: &'a SendGate,
    is_priority: bool,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        if self.is_priority {
            self.gate.priority_requested.store(false, Ordering::SeqCst);
        }
    }
}
