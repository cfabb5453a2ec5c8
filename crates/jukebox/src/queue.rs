use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Id that matches any item on pop.
pub const ANY_ID: u64 = 0;

#[derive(Debug)]
pub struct WorkItem<T> {
    pub payload: T,
    pub id: u64,
    pub enqueued: Instant,
    pub partition: String,
}

impl<T> WorkItem<T> {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued)
    }
}

/// FIFO shared between the event loop and the workers. Pops can be narrowed
/// to one id; non-matching items stay queued in order.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<WorkItem<T>>>,
    available: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, payload: T, id: u64, partition: impl Into<String>) {
        self.push_item(WorkItem {
            payload,
            id,
            enqueued: Instant::now(),
            partition: partition.into(),
        });
    }

    pub fn push_item(&self, item: WorkItem<T>) {
        self.items.lock().push_back(item);
        // poppers filter by id, so every waiter has to recheck
        self.available.notify_all();
    }

    /// Removes the oldest item whose id matches `id` (or any item for
    /// `ANY_ID`), waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration, id: u64) -> Option<WorkItem<T>> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        loop {
            if let Some(index) = items
                .iter()
                .position(|item| id == ANY_ID || item.id == id)
            {
                return items.remove(index);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                let index = items
                    .iter()
                    .position(|item| id == ANY_ID || item.id == id)?;
                return items.remove(index);
            }
        }
    }

    pub fn try_pop(&self, id: u64) -> Option<WorkItem<T>> {
        self.pop(Duration::ZERO, id)
    }

    /// Waits up to `timeout` for the queue to become non-empty and returns
    /// the current length.
    pub fn length(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.available.wait_until(&mut items, deadline).timed_out() {
                break;
            }
        }
        items.len()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Pops the first item older than `max_age`. A zero `max_age` pops the
    /// head unconditionally.
    pub fn expire(&self, max_age: Duration) -> Option<WorkItem<T>> {
        let now = Instant::now();
        let mut items = self.items.lock();
        let index = items
            .iter()
            .position(|item| max_age.is_zero() || item.age(now) > max_age)?;
        items.remove(index)
    }

    /// Drops every item older than `max_age` and returns how many went.
    pub fn expire_all(&self, max_age: Duration) -> usize {
        let mut dropped = 0;
        while self.expire(max_age).is_some() {
            dropped += 1;
        }
        dropped
    }
}
