//! # Connection Counter
//!
//! Process-wide count of live sessions. A single atomic is enough here
//! since the only operations are increment, decrement, and a point-in-time
//! read.

use std::sync::atomic::{AtomicI64, Ordering};

/// A shared, lock-free count of currently active sessions.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    count: AtomicI64,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        ConnectionCounter {
            count: AtomicI64::new(0),
        }
    }

    /// Records one new session, returning the count after the increment.
    pub fn increment(&self) -> i64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records one session ending, returning the count after the decrement.
    ///
    /// Callers must pair this with exactly one prior `increment` per
    /// session; `ProxySession` decrements exactly once on every exit path,
    /// including abnormal ones, so the count never drifts.
    pub fn decrement(&self) -> i64 {
        self.count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Returns the current live session count.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let c = ConnectionCounter::new();
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn increment_then_decrement_returns_to_zero() {
        let c = ConnectionCounter::new();
        assert_eq!(c.increment(), 1);
        assert_eq!(c.increment(), 2);
        assert_eq!(c.decrement(), 1);
        assert_eq!(c.decrement(), 0);
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn concurrent_increments_are_consistent() {
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(ConnectionCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    counter.increment();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.count(), 800);
    }
}
