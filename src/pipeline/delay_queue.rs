use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct QueueEntry<T> {
    ready_at: Instant,
    seq: u64,
    job: T,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ready_at
            .cmp(&other.ready_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct QueueState<T> {
    entries: BinaryHeap<Reverse<QueueEntry<T>>>,
    next_seq: u64,
}

impl<T> QueueState<T> {
    fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, job: T, ready_at: Instant) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(Reverse(QueueEntry { ready_at, seq, job }));
    }
}

/// Time-ordered job queue shared by many producers and consumers.
///
/// Entries are released earliest `ready_at` first, FIFO among equal timestamps, and
/// never before their `ready_at` has elapsed. `pop_if_ready` does not wait.
pub struct DelayQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        Self {
            state: Mutex::new(QueueState::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts `job` regardless of the capacity limit.
    pub async fn schedule(&self, job: T, ready_at: Instant) {
        self.state.lock().await.insert(job, ready_at);
    }

    /// Inserts `job` only if the queue currently holds fewer than `capacity` entries.
    /// The job is handed back when the queue is full.
    pub async fn try_schedule(&self, job: T, ready_at: Instant) -> Result<(), T> {
        let mut state = self.state.lock().await;
        if state.entries.len() >= self.capacity {
            return Err(job);
        }
        state.insert(job, ready_at);
        Ok(())
    }

    /// Removes and returns the earliest entry if its ready time has passed.
    pub async fn pop_if_ready(&self) -> Option<T> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let ready = state
            .entries
            .peek()
            .map(|Reverse(entry)| entry.ready_at <= now)
            .unwrap_or(false);
        if !ready {
            return None;
        }
        state.entries.pop().map(|Reverse(entry)| entry.job)
    }

    pub async fn next_ready_at(&self) -> Option<Instant> {
        self.state
            .lock()
            .await
            .entries
            .peek()
            .map(|Reverse(entry)| entry.ready_at)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
