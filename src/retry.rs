//! Deadline retry timer.
//!
//! A dedicated worker thread that invokes a scheduled callback after a fixed
//! interval, re-arming itself until the callback reports success. Foreground
//! and worker share one mutex over the protected target, so a callback never
//! runs concurrently with foreground work on the same state.
//!
//! The worker is a two-state actor, idle or armed. Every foreground
//! transition bumps a generation counter and wakes the worker; after a wake
//! the worker compares generations to tell "the schedule changed under me"
//! from "my deadline elapsed", which also disarms spurious wakeups.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

type RetryFn<T> = Box<dyn FnMut(&mut T) -> bool + Send>;

enum TimerState<T> {
    Idle,
    Armed {
        deadline: Instant,
        retry: RetryFn<T>,
    },
}

struct Inner<T> {
    target: T,
    state: TimerState<T>,
    interval: Duration,
    generation: u64,
    shutdown: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    wake: Condvar,
}

/// A retry timer owning a target value of type `T`.
///
/// All access to the target goes through [`RetryTimer::lock`], which also
/// exposes scheduling. Dropping the timer disarms it and joins the worker;
/// no callback runs after teardown begins.
pub struct RetryTimer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> RetryTimer<T> {
    /// Spawn the worker, taking ownership of `target`.
    ///
    /// `interval` is the delay before the first callback invocation and
    /// between retries.
    pub fn new(target: T, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                target,
                state: TimerState::Idle,
                interval,
                generation: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || worker_loop(&worker_shared));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Lock the target for foreground access and scheduling.
    ///
    /// The worker shares this lock, so holding the guard delays a pending
    /// callback until the guard drops.
    pub fn lock(&self) -> TimerGuard<'_, T> {
        TimerGuard {
            inner: self.shared.inner.lock(),
            wake: &self.shared.wake,
        }
    }
}

impl<T: Send + 'static> Drop for RetryTimer<T> {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.shutdown = true;
            inner.state = TimerState::Idle;
            inner.generation = inner.generation.wrapping_add(1);
            self.shared.wake.notify_one();
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Exclusive access to the timer target plus scheduling operations.
pub struct TimerGuard<'a, T> {
    inner: MutexGuard<'a, Inner<T>>,
    wake: &'a Condvar,
}

impl<T> TimerGuard<'_, T> {
    /// Arm the timer: invoke `retry` one interval from now.
    ///
    /// A `false` return re-arms for another interval, `true` disarms.
    /// Re-scheduling while armed replaces the callback and restarts the
    /// interval; the previous callback is dropped without running.
    pub fn schedule(&mut self, retry: impl FnMut(&mut T) -> bool + Send + 'static) {
        self.inner.state = TimerState::Armed {
            deadline: Instant::now() + self.inner.interval,
            retry: Box::new(retry),
        };
        self.inner.generation = self.inner.generation.wrapping_add(1);
        self.wake.notify_one();
    }

    /// Disarm the timer. Cancelling an idle timer skips the worker wake.
    pub fn cancel(&mut self) {
        if matches!(self.inner.state, TimerState::Idle) {
            return;
        }

        self.inner.state = TimerState::Idle;
        self.inner.generation = self.inner.generation.wrapping_add(1);
        self.wake.notify_one();
    }

    /// Whether a callback is currently scheduled.
    pub fn is_armed(&self) -> bool {
        matches!(self.inner.state, TimerState::Armed { .. })
    }
}

impl<T> Deref for TimerGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.target
    }
}

impl<T> DerefMut for TimerGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner.target
    }
}

fn worker_loop<T>(shared: &Shared<T>) {
    let mut inner = shared.inner.lock();

    loop {
        if inner.shutdown {
            break;
        }

        let deadline = match &inner.state {
            TimerState::Idle => None,
            TimerState::Armed { deadline, .. } => Some(*deadline),
        };

        let Some(deadline) = deadline else {
            shared.wake.wait(&mut inner);
            continue;
        };

        let generation = inner.generation;
        shared.wake.wait_until(&mut inner, deadline);

        if inner.shutdown {
            break;
        }
        if inner.generation != generation {
            // Rescheduled or cancelled while waiting, re-read the state.
            continue;
        }
        if Instant::now() < deadline {
            // Spurious wakeup.
            continue;
        }

        let TimerState::Armed { mut retry, .. } =
            mem::replace(&mut inner.state, TimerState::Idle)
        else {
            continue;
        };

        let done = retry(&mut inner.target);
        if !done {
            inner.state = TimerState::Armed {
                deadline: Instant::now() + inner.interval,
                retry,
            };
            inner.generation = inner.generation.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retries_until_callback_succeeds() {
        let timer = RetryTimer::new(0u32, Duration::from_millis(20));

        {
            let mut guard = timer.lock();
            guard.schedule(|count| {
                *count += 1;
                *count >= 3
            });
            // Nothing runs before the first interval elapses.
            assert_eq!(*guard, 0);
            assert!(guard.is_armed());
        }

        thread::sleep(Duration::from_millis(300));

        let guard = timer.lock();
        assert_eq!(*guard, 3);
        assert!(!guard.is_armed());
    }

    #[test]
    fn test_cancel_stops_pending_invocation() {
        let timer = RetryTimer::new(0u32, Duration::from_millis(30));

        {
            let mut guard = timer.lock();
            guard.schedule(|count| {
                *count += 1;
                false
            });
            guard.cancel();
            assert!(!guard.is_armed());
        }

        thread::sleep(Duration::from_millis(150));
        assert_eq!(*timer.lock(), 0);
    }

    #[test]
    fn test_reschedule_replaces_previous_callback() {
        let timer = RetryTimer::new(0u32, Duration::from_millis(20));

        {
            let mut guard = timer.lock();
            guard.schedule(|count| {
                *count += 1;
                true
            });
            guard.schedule(|count| {
                *count = 100;
                true
            });
        }

        thread::sleep(Duration::from_millis(150));
        assert_eq!(*timer.lock(), 100);
    }

    #[test]
    fn test_cancel_when_idle_is_a_no_op() {
        let timer = RetryTimer::new(0u32, Duration::from_millis(20));

        let mut guard = timer.lock();
        guard.cancel();
        assert!(!guard.is_armed());
    }

    #[test]
    fn test_drop_stops_the_worker() {
        let invocations = Arc::new(AtomicU32::new(0));
        let timer = RetryTimer::new(Arc::clone(&invocations), Duration::from_millis(20));

        timer.lock().schedule(|count| {
            count.fetch_add(1, Ordering::SeqCst);
            false
        });
        thread::sleep(Duration::from_millis(70));
        drop(timer);

        let after_drop = invocations.load(Ordering::SeqCst);
        assert!(after_drop >= 1);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(invocations.load(Ordering::SeqCst), after_drop);
    }
}
