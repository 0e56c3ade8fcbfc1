//! Cancellable timer driving the reconnect loop.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A one-shot scheduled task that can be cancelled before it fires.
///
/// Dropping the timer cancels it, which makes replacing a pending timer or
/// tearing the engine down deterministic: after `cancel` returns, the
/// callback either already ran or never will.
pub struct ReconnectTimer {
    shared: Arc<(Mutex<bool>, Condvar)>,
}

impl ReconnectTimer {
    /// Runs `task` on a helper thread after `delay`, unless cancelled first.
    pub fn schedule(delay: Duration, task: impl FnOnce() + Send + 'static) -> Self {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shared = Arc::clone(&shared);

        std::thread::spawn(move || {
            let (cancelled, condvar) = &*thread_shared;
            let deadline = Instant::now() + delay;
            let mut flag = cancelled.lock();
            while !*flag {
                if condvar.wait_until(&mut flag, deadline).timed_out() {
                    break;
                }
            }
            let fire = !*flag;
            drop(flag);
            if fire {
                task();
            }
        });

        Self { shared }
    }

    /// Cancels the pending task if it has not fired yet.
    pub fn cancel(&self) {
        let (cancelled, condvar) = &*self.shared;
        *cancelled.lock() = true;
        condvar.notify_all();
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let timer = ReconnectTimer::schedule(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst));
        drop(timer);
    }

    #[test]
    fn cancel_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let timer = ReconnectTimer::schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        timer.cancel();

        std::thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn drop_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let timer = ReconnectTimer::schedule(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        drop(timer);

        std::thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
