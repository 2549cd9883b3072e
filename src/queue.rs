//! Lock-free multi-producer single-consumer event queue.
//!
//! An intrusive linked queue (Vyukov style): producers swap themselves onto
//! the head and link the previous node behind them, two atomic operations,
//! wait-free once a node is in hand. The single consumer walks from the
//! tail.
//!
//! Nodes come from a lock-free free-list pool and keep their name-string
//! capacity across reuse, so steady-state enqueue does not allocate. When
//! the pool runs dry producers fall back to allocation; when it overflows
//! returned nodes are freed.
//!
//! FIFO holds per producer. Cross-producer order is whatever the TSC
//! timestamps say, which is all the aggregator needs.

use crate::chrono::TimePoint;
use crate::metrics::{Event, EventKind};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

/// Free-list capacity: nodes kept warm for reuse.
const POOL_CAPACITY: usize = 4_096;

struct Node {
    next: AtomicPtr<Node>,
    event: Event,
}

impl Node {
    fn empty() -> Box<Node> {
        Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            event: Event::default(),
        })
    }
}

/// The MPSC event queue.
///
/// `push` may be called from any thread; `pop_with` and `drain` only from
/// the single consumer.
pub struct EventQueue {
    /// Push end: the most recently enqueued node.
    head: CachePadded<AtomicPtr<Node>>,
    /// Pop end: consumed stub whose `next` is the oldest pending node.
    tail: CachePadded<UnsafeCell<*mut Node>>,
    pool: ArrayQueue<Box<Node>>,
    len: AtomicUsize,
    /// Drop-policy threshold; 0 means unbounded.
    capacity: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: head is atomic; tail is only touched by the single consumer,
// which the `pop_with`/`drain` contract pins to one thread at a time.
unsafe impl Send for EventQueue {}
unsafe impl Sync for EventQueue {}

impl EventQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue that sheds events beyond `capacity` entries.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        let stub = Box::into_raw(Node::empty());
        let pool = ArrayQueue::new(POOL_CAPACITY);
        // Warm up part of the pool so bursts at startup stay allocation-free.
        for _ in 0..POOL_CAPACITY / 4 {
            let _ = pool.push(Node::empty());
        }
        Self {
            head: CachePadded::new(AtomicPtr::new(stub)),
            tail: CachePadded::new(UnsafeCell::new(stub)),
            pool,
            len: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity.unwrap_or(0)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Install or clear the drop-policy threshold.
    ///
    /// Takes effect for subsequent pushes; pending events are kept either
    /// way.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.capacity
            .store(capacity.unwrap_or(0), Ordering::Relaxed);
    }

    /// The drop-policy threshold, if one is set.
    pub fn capacity(&self) -> Option<usize> {
        match self.capacity.load(Ordering::Relaxed) {
            0 => None,
            capacity => Some(capacity),
        }
    }

    /// Enqueue an event. Returns `false` if the drop policy shed it.
    ///
    /// Lock-free; wait-free once the node is obtained.
    pub fn push(&self, name: &str, kind: EventKind, timestamp: TimePoint) -> bool {
        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity > 0 && self.len.load(Ordering::Relaxed) >= capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut node = self.pool.pop().unwrap_or_else(Node::empty);
        node.event.fill(name, kind, timestamp);
        node.next.store(ptr::null_mut(), Ordering::Relaxed);

        let node = Box::into_raw(node);
        let prev = self.head.swap(node, Ordering::AcqRel);
        // SAFETY: prev is either the stub or a node we own until the
        // consumer retires it; linking is the only mutation here.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Dequeue one event and hand it to `f` in place.
    ///
    /// Single consumer only. Returns `None` when no event is ready (an
    /// in-flight push is not waited for).
    pub fn pop_with<R>(&self, f: impl FnOnce(&Event) -> R) -> Option<R> {
        // SAFETY: single-consumer contract; tail is ours alone.
        unsafe {
            let tail = *self.tail.get();
            let next = (*tail).next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }

            let result = f(&(*next).event);

            *self.tail.get() = next;
            self.len.fetch_sub(1, Ordering::Relaxed);
            self.recycle(Box::from_raw(tail));
            Some(result)
        }
    }

    /// Dequeue up to `limit` events into `f`. Returns how many were seen.
    pub fn drain(&self, limit: usize, mut f: impl FnMut(&Event)) -> usize {
        let mut drained = 0;
        while drained < limit {
            if self.pop_with(&mut f).is_none() {
                break;
            }
            drained += 1;
        }
        drained
    }

    fn recycle(&self, mut node: Box<Node>) {
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        // Pool full: let the node drop.
        let _ = self.pool.push(node);
    }

    /// Estimated number of pending events.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the estimate says the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events shed by the drop policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        // SAFETY: exclusive access; walk the chain from the tail stub.
        unsafe {
            let mut cursor = *self.tail.get();
            while !cursor.is_null() {
                let next = (*cursor).next.load(Ordering::Relaxed);
                drop(Box::from_raw(cursor));
                cursor = next;
            }
        }
    }
}
