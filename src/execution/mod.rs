//! Execution serialization
//!
//! Exactly one command may be in flight against the shared shell. Callers
//! queue on a FIFO-fair async mutex around the shell slot; the number of
//! waiters is tracked separately so health checks can report queue depth
//! without touching the slot.
//!
//! A caller that gives up while queued (its future is dropped) leaves the
//! queue immediately and never touches the shell.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// FIFO gate around a single execution slot
#[derive(Debug)]
pub struct ExecutionSerializer<T> {
    slot: Mutex<T>,
    waiting: AtomicUsize,
    busy: AtomicBool,
}

/// Exclusive access to the slot; released on drop
#[derive(Debug)]
pub struct SlotGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    busy: &'a AtomicBool,
}

/// Counts a caller as queued until it is dropped
struct QueueTicket<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> QueueTicket<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self { waiting }
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> ExecutionSerializer<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(value),
            waiting: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
        }
    }

    /// Wait for the slot in arrival order
    pub async fn acquire(&self) -> SlotGuard<'_, T> {
        let ticket = QueueTicket::enter(&self.waiting);
        let guard = self.slot.lock().await;
        drop(ticket);
        self.hold(guard)
    }

    /// Take the slot only if nobody holds it
    pub fn try_acquire(&self) -> Option<SlotGuard<'_, T>> {
        self.slot.try_lock().ok().map(|guard| self.hold(guard))
    }

    fn hold<'a>(&'a self, guard: MutexGuard<'a, T>) -> SlotGuard<'a, T> {
        self.busy.store(true, Ordering::SeqCst);
        SlotGuard {
            guard,
            busy: &self.busy,
        }
    }

    /// Callers currently waiting for the slot (the holder is not counted)
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether someone holds the slot right now
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}
