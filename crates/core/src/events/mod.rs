use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use crate::{shared::RunFlag, Result, VisualHiveError};

/// How often a blocked consumer re-checks the running flag.
const WAKE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Keyboard,
}

/// One operator input, consumed exactly once by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub code: char,
    pub is_key_down: bool,
}

impl Event {
    pub fn key_down(code: char) -> Self {
        Self {
            kind: EventKind::Keyboard,
            code,
            is_key_down: true,
        }
    }

    pub fn key_up(code: char) -> Self {
        Self {
            kind: EventKind::Keyboard,
            code,
            is_key_down: false,
        }
    }
}

/// FIFO queue guarded by a mutex and condition variable. Producers never
/// block; a bounded queue drops its oldest item instead.
#[derive(Debug)]
pub struct SyncQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: Option<usize>,
}

pub type EventQueue = SyncQueue<Event>;

impl<T> SyncQueue<T> {
    pub fn unbounded() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: None,
        }
    }

    /// Queue holding at most `capacity` items; a push past that drops the oldest.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Appends `item`; returns the item evicted to make room, if any.
    pub fn push(&self, item: T) -> Result<Option<T>> {
        let mut items = self.lock()?;
        let evicted = match self.capacity {
            Some(capacity) if items.len() >= capacity => items.pop_front(),
            _ => None,
        };
        items.push_back(item);
        drop(items);
        self.ready.notify_one();
        Ok(evicted)
    }

    /// Pops without blocking.
    pub fn try_pop(&self) -> Result<Option<T>> {
        Ok(self.lock()?.pop_front())
    }

    /// Takes everything currently queued, in arrival order.
    pub fn drain(&self) -> Result<Vec<T>> {
        Ok(self.lock()?.drain(..).collect())
    }

    /// Blocks until an item arrives or `running` is cleared.
    pub fn wait_and_pop(&self, running: &RunFlag) -> Result<Option<T>> {
        let mut items = self.lock()?;
        loop {
            if let Some(item) = items.pop_front() {
                return Ok(Some(item));
            }
            if !running.is_running() {
                return Ok(None);
            }
            let (guard, _) = self
                .ready
                .wait_timeout_while(items, WAKE_INTERVAL, |items| {
                    items.is_empty() && running.is_running()
                })
                .map_err(|_| VisualHiveError::Poisoned("queue"))?;
            items = guard;
        }
    }

    /// Wakes every blocked consumer so it can observe shutdown.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<T>>> {
        self.items
            .lock()
            .map_err(|_| VisualHiveError::Poisoned("queue"))
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
