//! Counting semaphore
//!
//! The queue's hand-off discipline is the classical bounded-buffer solution:
//! one semaphore counts free slots, one counts occupied slots. std has no
//! counting semaphore, so this is the textbook Mutex + Condvar construction.

use std::sync::{Condvar, Mutex};

/// A counting semaphore: a non-negative permit count with blocking acquire.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Takes one permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .expect("semaphore mutex poisoned");
        }
        *permits -= 1;
    }

    /// Takes one permit only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Returns one permit, waking a single waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    /// Returns `n` permits at once, waking every waiter.
    pub fn release_n(&self, n: usize) {
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        *permits += n;
        drop(permits);
        self.available.notify_all();
    }

    /// Current permit count. Advisory: stale the moment it is read.
    pub fn permits(&self) -> usize {
        *self.permits.lock().expect("semaphore mutex poisoned")
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::Semaphore;

    #[test]
    fn acquire_decrements_and_release_increments() {
        let sem = Semaphore::new(2);
        sem.acquire();
        assert_eq!(1, sem.permits());
        sem.acquire();
        assert_eq!(0, sem.permits());
        sem.release();
        assert_eq!(1, sem.permits());
    }

    #[test]
    fn try_acquire_fails_at_zero_without_blocking() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_blocks_until_release() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire())
        };

        // Give the waiter time to block, then let it through.
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        sem.release();
        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn release_n_wakes_multiple_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        sem.release_n(3);
        for waiter in waiters {
            waiter.join().expect("waiter thread panicked");
        }
        assert_eq!(0, sem.permits());
    }
}
