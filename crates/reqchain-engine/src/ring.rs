//! Bounded lock-free SPSC queue connecting pipeline stages.
//!
//! One producer thread writes, one consumer thread reads. Position counters
//! only ever increase, so `head - tail` distinguishes empty from full without
//! a spare slot. Blocking calls escalate from busy-spinning to yielding to a
//! bounded sleep while the ring stays full (or empty).

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const SLEEP_BASE: Duration = Duration::from_micros(50);
const SLEEP_MAX: Duration = Duration::from_millis(2);

/// Spin, then yield, then sleep with a capped exponential delay.
struct Backoff {
    step: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exp = (self.step - YIELD_LIMIT).min(8);
            thread::sleep((SLEEP_BASE * (1u32 << exp)).min(SLEEP_MAX));
        }
        self.step = self.step.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Slots and cursors
// ---------------------------------------------------------------------------

struct Slot<T> {
    value: UnsafeCell<Option<T>>,
}

const CACHE_LINE: usize = 64;

/// Cursor padded to its own cache line to avoid false sharing.
#[repr(C)]
struct PaddedAtomicUsize {
    value: AtomicUsize,
    _padding: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
}

impl PaddedAtomicUsize {
    fn new(val: usize) -> Self {
        Self {
            value: AtomicUsize::new(val),
            _padding: [0; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
        }
    }

    fn load(&self, order: Ordering) -> usize {
        self.value.load(order)
    }

    fn store(&self, val: usize, order: Ordering) {
        self.value.store(val, order);
    }
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity single-producer single-consumer queue.
///
/// Values are delivered exactly once and in FIFO order. Using more than one
/// producer or more than one consumer at a time is a logic error.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Write position (only advanced by the producer).
    head: PaddedAtomicUsize,
    /// Read position (only advanced by the consumer).
    tail: PaddedAtomicUsize,
    closed: AtomicBool,
}

// SAFETY: slot access is partitioned by the head/tail cursors. The producer
// only touches slots in `[head, tail + capacity)`, the consumer only slots in
// `[tail, head)`, and ownership of a slot transfers through a release store
// paired with an acquire load on the opposite cursor.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring holding at least `capacity` values.
    ///
    /// Capacity is rounded up to the next power of two (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots: Vec<Slot<T>> = (0..capacity)
            .map(|_| Slot {
                value: UnsafeCell::new(None),
            })
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            head: PaddedAtomicUsize::new(0),
            tail: PaddedAtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of values currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to enqueue without blocking (producer side).
    ///
    /// # Errors
    ///
    /// Returns the value back if the ring is full or closed.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        if self.is_closed() {
            return Err(value);
        }
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity() {
            return Err(value);
        }

        let slot = &self.slots[head & self.mask];
        // SAFETY: single producer, and the slot is outside `[tail, head)` so
        // the consumer is not reading it.
        unsafe {
            *slot.value.get() = Some(value);
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Try to dequeue without blocking (consumer side).
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let slot = &self.slots[tail & self.mask];
        // SAFETY: single consumer, and the acquire load of `head` makes the
        // producer's write to this slot visible.
        let value = unsafe { (*slot.value.get()).take() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        value
    }

    /// Enqueue, waiting while the ring is full.
    ///
    /// # Errors
    ///
    /// Returns the value back once the ring is closed; nothing is ever dropped
    /// or overwritten.
    pub fn write(&self, value: T) -> Result<(), T> {
        let mut value = value;
        let mut backoff = Backoff::new();
        loop {
            match self.try_push(value) {
                Ok(()) => return Ok(()),
                Err(v) if self.is_closed() => return Err(v),
                Err(v) => {
                    value = v;
                    backoff.snooze();
                }
            }
        }
    }

    /// Dequeue, waiting while the ring is empty.
    ///
    /// Returns `None` once the ring is both closed and drained.
    pub fn read(&self) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return Some(value);
            }
            if self.is_closed() {
                // Values published before `close` are visible after the acquire.
                return self.try_pop();
            }
            backoff.snooze();
        }
    }

    /// Mark the ring closed. Idempotent; may be called from either side.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
