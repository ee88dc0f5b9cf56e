use std::collections::VecDeque;

use serde::Serialize;

use crate::models::{LocationSample, SessionMeta};

/// Body of `POST /employee-tracking/location` and of the `location:update`
/// socket event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    #[serde(flatten)]
    pub sample: LocationSample,
    #[serde(flatten)]
    pub meta: SessionMeta,
    #[serde(skip)]
    pub attempts: u32,
}

impl PendingUpdate {
    pub fn new(sample: LocationSample, meta: SessionMeta) -> Self {
        Self {
            sample,
            meta,
            attempts: 0,
        }
    }
}

/// Bounded queue of updates the socket could not deliver.
#[derive(Debug)]
pub struct Outbox {
    pending: VecDeque<PendingUpdate>,
    capacity: usize,
    max_attempts: u32,
}

impl Outbox {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Queues an update, returning the one evicted to make room, if any.
    pub fn push(&mut self, update: PendingUpdate) -> Option<PendingUpdate> {
        let evicted = if self.pending.len() >= self.capacity {
            self.pending.pop_front()
        } else {
            None
        };
        self.pending.push_back(update);
        evicted
    }

    pub fn front(&self) -> Option<&PendingUpdate> {
        self.pending.front()
    }

    pub fn pop_delivered(&mut self) -> Option<PendingUpdate> {
        self.pending.pop_front()
    }

    /// Counts a failed attempt on the head entry. Returns the entry if it has
    /// now used up its attempts and was discarded.
    pub fn record_failure(&mut self) -> Option<PendingUpdate> {
        let head = self.pending.front_mut()?;
        head.attempts += 1;
        if head.attempts >= self.max_attempts {
            self.pending.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
