//! Blocking primitives built on spin locks and the scheduler.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use crate::Scheduler;

/// A condition variable with Mesa semantics.
///
/// Waiters must hold the lock protecting the condition when calling
/// [`wait`](Self::wait), notifiers must hold it when calling
/// [`notify_all`](Self::notify_all). Woken waiters re-check their predicate.
#[derive(Debug, Default)]
pub struct CondVar {
    generation: AtomicUsize,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            generation: AtomicUsize::new(0),
        }
    }

    /// Releases `guard`, yields until notified and reacquires `lock`.
    pub fn wait<'a, T, S>(
        &self,
        guard: MutexGuard<'a, T>,
        lock: &'a Mutex<T>,
        scheduler: &S,
    ) -> MutexGuard<'a, T>
    where
        S: Scheduler + ?Sized,
    {
        let seen = self.generation.load(Ordering::Acquire);
        drop(guard);
        while self.generation.load(Ordering::Acquire) == seen {
            scheduler.yield_now();
        }
        lock.lock()
    }

    /// Wakes every waiter.
    pub fn notify_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

/// A counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
}

impl Semaphore {
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
        }
    }

    /// Takes a permit, yielding until one is available.
    pub fn acquire<S: Scheduler + ?Sized>(&self, scheduler: &S) -> SemaphorePermit<'_> {
        loop {
            {
                let mut permits = self.permits.lock();
                if *permits > 0 {
                    *permits -= 1;
                    return SemaphorePermit { semaphore: self };
                }
            }
            scheduler.yield_now();
        }
    }

    /// Returns the number of permits currently available.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

/// A held semaphore permit, returned on drop.
#[must_use]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        *self.semaphore.permits.lock() += 1;
    }
}
