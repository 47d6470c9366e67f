use crate::epoch::Epoch;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Hover updates, watch ticks, clock ticks. May be dropped under pressure.
    Low,
    Normal,
    /// User input and lifecycle events.
    Critical,
}

impl Priority {
    pub fn droppable(self) -> bool {
        matches!(self, Priority::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    pub producer: &'static str,
    pub epoch: Epoch,
    pub priority: Priority,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(producer: &'static str, epoch: Epoch, priority: Priority, payload: T) -> Self {
        Self {
            producer,
            epoch,
            priority,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Queued,
    /// Queued after evicting the oldest droppable event.
    EvictedOldest,
    /// The bus was full of undroppable events and the incoming event was low priority.
    DroppedIncoming,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub posted: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

struct BusState<T> {
    queue: VecDeque<Envelope<T>>,
    closed: bool,
    posted: u64,
    delivered: u64,
    dropped: u64,
}

struct BusShared<T> {
    capacity: usize,
    state: Mutex<BusState<T>>,
    ready: Condvar,
}

impl<T> BusShared<T> {
    fn lock(&self) -> MutexGuard<'_, BusState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BusSender<T> {
    shared: Arc<BusShared<T>>,
}

impl<T> Clone for BusSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct BusReceiver<T> {
    shared: Arc<BusShared<T>>,
}

pub fn channel<T>(capacity: usize) -> (BusSender<T>, BusReceiver<T>) {
    let shared = Arc::new(BusShared {
        capacity: capacity.max(1),
        state: Mutex::new(BusState {
            queue: VecDeque::with_capacity(capacity.max(1)),
            closed: false,
            posted: 0,
            delivered: 0,
            dropped: 0,
        }),
        ready: Condvar::new(),
    });
    (
        BusSender {
            shared: Arc::clone(&shared),
        },
        BusReceiver { shared },
    )
}

impl<T> BusSender<T> {
    /// Never blocks. Undroppable events are queued even past capacity.
    pub fn post(&self, envelope: Envelope<T>) -> Result<PostOutcome, BusError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        let mut outcome = PostOutcome::Queued;
        if state.queue.len() >= self.shared.capacity {
            let oldest_low = state
                .queue
                .iter()
                .position(|queued| queued.priority.droppable());
            match oldest_low {
                Some(index) => {
                    state.queue.remove(index);
                    state.dropped += 1;
                    outcome = PostOutcome::EvictedOldest;
                }
                None if envelope.priority.droppable() => {
                    state.dropped += 1;
                    return Ok(PostOutcome::DroppedIncoming);
                }
                None => {}
            }
        }

        state.posted += 1;
        state.queue.push_back(envelope);
        drop(state);
        self.shared.ready.notify_one();
        Ok(outcome)
    }

    pub fn close(&self) {
        close_shared(&self.shared);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> BusReceiver<T> {
    /// Blocks until an event is available. Returns `None` once the bus is
    /// closed and every queued event has been delivered.
    pub fn recv(&self) -> Option<Envelope<T>> {
        let mut state = self.shared.lock();
        loop {
            if let Some(envelope) = state.queue.pop_front() {
                state.delivered += 1;
                return Some(envelope);
            }
            if state.closed {
                return None;
            }
            state = self
                .shared
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Envelope<T>, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(envelope) = state.queue.pop_front() {
                state.delivered += 1;
                return Ok(envelope);
            }
            if state.closed {
                return Err(RecvTimeoutError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
            let (next, _) = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    pub fn try_recv(&self) -> Option<Envelope<T>> {
        let mut state = self.shared.lock();
        let envelope = state.queue.pop_front()?;
        state.delivered += 1;
        Some(envelope)
    }

    pub fn close(&self) {
        close_shared(&self.shared);
    }

    pub fn stats(&self) -> BusStats {
        let state = self.shared.lock();
        BusStats {
            posted: state.posted,
            delivered: state.delivered,
            dropped: state.dropped,
            queued: state.queue.len(),
        }
    }
}

fn close_shared<T>(shared: &BusShared<T>) {
    let mut state = shared.lock();
    state.closed = true;
    drop(state);
    shared.ready.notify_all();
}
