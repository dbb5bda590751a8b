//! Bounded lock-free MPMC queue.
//!
//! A fixed array of ticket-slotted cells. Producers claim a ticket from
//! `head`, consumers from `tail`; the cell for ticket `i` is `slots[i & mask]`
//! and its generation is `i / capacity`. A cell's `turn` counter is even
//! (`2g`) when generation `g` may write it and odd (`2g + 1`) when generation
//! `g` may read it, so a slot is handed back and forth between the producer
//! and consumer side without any shared lock.
//!
//! Used for the listener -> worker session handoff and as the logger's
//! ingress queue.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// One cell of the ring. Aligned to a cache line so neighbouring cells'
/// turn counters never share a line.
#[repr(align(64))]
struct Slot<T> {
    turn: AtomicU64,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Cache-line aligned cursor, keeping `head` and `tail` off each other's
/// lines and off the slot array.
#[repr(align(64))]
struct Cursor(AtomicU64);

/// Bounded multi-producer multi-consumer queue with power-of-two capacity.
///
/// Blocking operations (`push`, `pop`, `consume`) spin with
/// `thread::yield_now` until their cell reaches the correct turn; `try_*`
/// variants never wait and report `false`/`None` only when a re-read of the
/// cursor shows no concurrent movement (no spurious failures).
pub struct BoundedQueue<T> {
    slots: Box<[Slot<T>]>,
    capacity: u64,
    mask: u64,
    head: Cursor,
    tail: Cursor,
}

// Safety: slot hand-off is mediated by the per-cell turn protocol; a value
// is written by exactly one producer (release) and read by exactly one
// consumer (acquire) per generation.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a non-zero power of two.
    pub fn new(capacity: u64) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "BoundedQueue capacity must be a non-zero power of two, got {capacity}"
        );
        let slots = (0..capacity)
            .map(|_| Slot {
                turn: AtomicU64::new(0),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        BoundedQueue {
            slots,
            capacity,
            mask: capacity - 1,
            head: Cursor(AtomicU64::new(0)),
            tail: Cursor(AtomicU64::new(0)),
        }
    }

    #[inline]
    fn slot(&self, ticket: u64) -> &Slot<T> {
        &self.slots[(ticket & self.mask) as usize]
    }

    /// Generation of a ticket.
    #[inline]
    fn turn(&self, ticket: u64) -> u64 {
        ticket / self.capacity
    }

    /// Cell turn to publish after consuming `ticket`. The last generation
    /// wraps the cell back to zero so the protocol survives ticket-counter
    /// overflow.
    #[inline]
    fn next_turn(&self, ticket: u64) -> u64 {
        let generation = self.turn(ticket);
        if generation == self.turn(u64::MAX) {
            0
        } else {
            generation * 2 + 2
        }
    }

    /// Push a value, spinning until a slot becomes writable.
    pub fn push(&self, value: T) {
        self.push_with(|| value);
    }

    /// Push the result of `f`, constructing it directly once the claimed
    /// slot is writable. The logger uses this to format records in place
    /// of a separate staging copy.
    pub fn push_with<F: FnOnce() -> T>(&self, f: F) {
        let ticket = self.head.0.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        while self.turn(ticket) * 2 != slot.turn.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        unsafe { (*slot.data.get()).write(f()) };
        slot.turn
            .store(self.turn(ticket) * 2 + 1, Ordering::Release);
    }

    /// Try to push without waiting.
    ///
    /// Returns `false` only when the queue is genuinely full: the claimed
    /// slot is not writable and a re-read of `head` shows no movement.
    pub fn try_push(&self, value: T) -> bool {
        let mut value = Some(value);
        self.try_push_with(|| value.take().expect("slot claimed twice"))
    }

    fn try_push_with<F: FnMut() -> T>(&self, mut f: F) -> bool {
        let mut ticket = self.head.0.load(Ordering::Acquire);
        loop {
            let slot = self.slot(ticket);
            if self.turn(ticket) * 2 == slot.turn.load(Ordering::Acquire) {
                match self.head.0.compare_exchange(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.data.get()).write(f()) };
                        slot.turn
                            .store(self.turn(ticket) * 2 + 1, Ordering::Release);
                        return true;
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let current = self.head.0.load(Ordering::Acquire);
                if current == ticket {
                    // Not our turn to write and nobody else is making
                    // progress: the ring is full.
                    return false;
                }
                ticket = current;
            }
        }
    }

    /// Pop a value, spinning until one is available.
    pub fn pop(&self) -> T {
        let ticket = self.tail.0.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        while self.turn(ticket) * 2 + 1 != slot.turn.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        let value = unsafe { (*slot.data.get()).assume_init_read() };
        slot.turn.store(self.next_turn(ticket), Ordering::Release);
        value
    }

    /// Try to pop without waiting. Returns `None` only when the queue is
    /// genuinely empty (tail did not move between two observations).
    pub fn try_pop(&self) -> Option<T> {
        let mut ticket = self.tail.0.load(Ordering::Acquire);
        loop {
            let slot = self.slot(ticket);
            if self.turn(ticket) * 2 + 1 == slot.turn.load(Ordering::Acquire) {
                match self.tail.0.compare_exchange(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        slot.turn.store(self.next_turn(ticket), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let current = self.tail.0.load(Ordering::Acquire);
                if current == ticket {
                    return None;
                }
                ticket = current;
            }
        }
    }

    /// Push `n` items from `items`, reserving `n` consecutive tickets up
    /// front so one producer's batch stays contiguous in pop order.
    ///
    /// # Panics
    ///
    /// Panics if `items` yields fewer than `n` values.
    pub fn bulk_push<I>(&self, items: I, n: u64)
    where
        I: IntoIterator<Item = T>,
    {
        let start = self.head.0.fetch_add(n, Ordering::Relaxed);
        let mut items = items.into_iter();
        for i in 0..n {
            let ticket = start.wrapping_add(i);
            let slot = self.slot(ticket);
            while self.turn(ticket) * 2 != slot.turn.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            let value = items.next().expect("bulk_push iterator ran short");
            unsafe { (*slot.data.get()).write(value) };
            slot.turn
                .store(self.turn(ticket) * 2 + 1, Ordering::Release);
        }
    }

    /// Drain everything currently poppable into `out`. Returns the count.
    pub fn bulk_pop(&self, out: &mut Vec<T>) -> u64 {
        self.try_consume_all(|value| out.push(value))
    }

    /// Pop one value and hand it to `f`, spinning until one is available.
    pub fn consume<F: FnOnce(T)>(&self, f: F) {
        let ticket = self.tail.0.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        while self.turn(ticket) * 2 + 1 != slot.turn.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        let value = unsafe { (*slot.data.get()).assume_init_read() };
        f(value);
        slot.turn.store(self.next_turn(ticket), Ordering::Release);
    }

    /// Consume as much as is currently available, invoking `f` per value.
    ///
    /// A non-ready cell is retried only when `tail` moved between two
    /// observations (another consumer got there first); otherwise the cell
    /// belongs to an in-progress producer and the call returns rather than
    /// waiting on it. Returns the number of values consumed.
    pub fn try_consume_all<F: FnMut(T)>(&self, mut f: F) -> u64 {
        let mut ticket = self.tail.0.load(Ordering::Acquire);
        let mut consumed = 0;
        loop {
            let slot = self.slot(ticket);
            if self.turn(ticket) * 2 + 1 == slot.turn.load(Ordering::Acquire) {
                match self.tail.0.compare_exchange(
                    ticket,
                    ticket.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        f(value);
                        slot.turn.store(self.next_turn(ticket), Ordering::Release);
                        ticket = ticket.wrapping_add(1);
                        consumed += 1;
                    }
                    Err(current) => ticket = current,
                }
            } else {
                let current = self.tail.0.load(Ordering::Acquire);
                if current == ticket {
                    return consumed;
                }
                ticket = current;
            }
        }
    }

    /// Number of values currently in the queue. Racy by nature; only a
    /// hint for idle checks and tests.
    pub fn len(&self) -> u64 {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Relaxed);
        let diff = head.wrapping_sub(tail) as i64;
        if diff < 0 { 0 } else { diff as u64 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // An odd turn means the cell holds a value that was published but
        // never consumed.
        for slot in self.slots.iter() {
            if slot.turn.load(Ordering::Relaxed) & 1 == 1 {
                unsafe { (*slot.data.get()).assume_init_drop() };
            }
        }
    }
}
