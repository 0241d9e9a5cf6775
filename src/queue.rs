//! Bounded connection queue
//!
//! The hand-off point between a worker's accept loop and its thread pool: a
//! fixed ring of connection slots guarded by the classical counting-semaphore
//! discipline. `empty` counts free slots, `filled` counts occupied slots, and
//! a mutex serializes the ring indices; together their initial values exclude
//! both underflow and overflow. The capacity bound is load-bearing: when the
//! ring is full the producer answers 503 instead of queueing, so overload is
//! signalled back to clients rather than absorbed.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::sem::Semaphore;

/// Ring capacity. A design constant, not a tunable: sizing the queue is part
/// of the overload contract.
pub const QUEUE_CAPACITY: usize = 100;

/// Failed hand-off, returning the rejected item to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Every slot is occupied.
    Full(T),
    /// The queue has been shut down.
    ShutDown(T),
}

impl<T> PushError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(value) | PushError::ShutDown(value) => value,
        }
    }
}

impl<T> Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PushError::Full(_) => "queue full",
            PushError::ShutDown(_) => "queue shut down",
        })
    }
}

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
}

/// A fixed-capacity FIFO hand-off queue.
///
/// Generic over the carried item so the discipline can be exercised without
/// sockets; the worker instantiates it with `std::net::TcpStream`. Dropping
/// the queue drops any items still in their slots, which closes still-queued
/// connections.
#[derive(Debug)]
pub struct ConnectionQueue<T> {
    ring: Mutex<Ring<T>>,
    empty: Semaphore,
    filled: Semaphore,
    shutdown: AtomicBool,
    capacity: usize,
}

impl<T> ConnectionQueue<T> {
    /// Creates a queue with the standard [`QUEUE_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    /// Creates a queue with an explicit capacity (tests only exercise small
    /// rings; production uses [`new`](Self::new)).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        ConnectionQueue {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
            }),
            empty: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            shutdown: AtomicBool::new(false),
            capacity,
        }
    }

    /// Enqueues `value`, blocking while the ring is full.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.empty.acquire();
        self.commit(value)
    }

    /// Enqueues `value` only if a slot is free right now.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        if !self.empty.try_acquire() {
            return Err(PushError::Full(value));
        }
        self.commit(value)
    }

    // Caller holds one `empty` permit.
    fn commit(&self, value: T) -> Result<(), PushError<T>> {
        if self.shutdown.load(Ordering::Acquire) {
            self.empty.release();
            return Err(PushError::ShutDown(value));
        }

        let mut ring = self.ring.lock().expect("queue mutex poisoned");
        let tail = ring.tail;
        ring.slots[tail] = Some(value);
        ring.tail = (tail + 1) % self.capacity;
        drop(ring);

        self.filled.release();
        Ok(())
    }

    /// Dequeues the oldest item, blocking while the ring is empty. Returns
    /// `None` once the queue has been shut down.
    pub fn pop(&self) -> Option<T> {
        self.filled.acquire();
        if self.shutdown.load(Ordering::Acquire) {
            // Hand the permit back so every peer blocked on `filled` also
            // observes termination.
            self.filled.release();
            return None;
        }

        let mut ring = self.ring.lock().expect("queue mutex poisoned");
        let head = ring.head;
        let value = ring.slots[head].take();
        ring.head = (head + 1) % self.capacity;
        drop(ring);

        self.empty.release();
        value
    }

    /// Advisory occupancy, computed from the ring indices. Not serialized
    /// with concurrent push/pop.
    pub fn len(&self) -> usize {
        let ring = self.ring.lock().expect("queue mutex poisoned");
        (ring.tail + self.capacity - ring.head) % self.capacity
    }

    /// Whether the advisory occupancy is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Terminates the queue: consumers blocked in [`pop`](Self::pop) wake and
    /// observe `None`; producers fail with [`PushError::ShutDown`] once
    /// consumers drain the remaining slots. `filled` is released `capacity`
    /// times, which is never less than the thread-pool size, so no consumer
    /// stays parked.
    pub fn shut_down(&self) {
        {
            let _ring = self.ring.lock().expect("queue mutex poisoned");
            self.shutdown.store(true, Ordering::Release);
        }
        self.filled.release_n(self.capacity);
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl<T> Default for ConnectionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
