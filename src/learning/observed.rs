use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::features::FeatureVector;

/// Features and sender of a message seen by `observe`, kept until feedback arrives.
#[derive(Debug, Clone)]
pub(super) struct Observed {
    pub sender: String,
    pub features: FeatureVector,
}

/// Insertion-ordered cache of observed messages with a fixed capacity.
///
/// Once full, the oldest observation is evicted. Re-observing a message refreshes its
/// position.
#[derive(Debug)]
pub(super) struct ObservedCache {
    capacity: usize,
    next_seq: u64,
    entries: HashMap<String, (u64, Observed)>,
    order: VecDeque<(u64, String)>,
}

impl ObservedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, message_id: &str, observed: Observed) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(message_id.to_string(), (seq, observed));
        self.order.push_back((seq, message_id.to_string()));
        while self.entries.len() > self.capacity {
            let Some((seq, id)) = self.order.pop_front() else {
                break;
            };
            // Stale queue slots belong to ids re-inserted or taken since.
            if self.entries.get(&id).is_some_and(|(current, _)| *current == seq) {
                self.entries.remove(&id);
                debug!("Evicted observation for {id}");
            }
        }
        if self.order.len() > self.capacity.saturating_mul(2) {
            let entries = &self.entries;
            self.order
                .retain(|(seq, id)| entries.get(id).is_some_and(|(current, _)| current == seq));
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&Observed> {
        self.entries.get(message_id).map(|(_, observed)| observed)
    }

    pub fn take(&mut self, message_id: &str) -> Option<Observed> {
        self.entries.remove(message_id).map(|(_, observed)| observed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
