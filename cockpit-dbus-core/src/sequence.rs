//! Reorder buffer that releases bridge frames strictly in `seq` order.

use crate::message::Message;
use std::collections::BTreeMap;

/// Frames held behind a gap before the stream is declared broken.
pub const DEFAULT_MAX_HELD: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sequence gap at {missing} not filled after {held} later frames")]
pub struct SequenceError {
    pub missing: u64,
    pub held: usize,
}

/// Holds frames that arrive ahead of a gap until the gap fills.
///
/// The first sequenced frame seen fixes the starting point. Frames without
/// a sequence number pass straight through; frames at or below the last
/// released number are duplicates and are dropped.
#[derive(Debug)]
pub struct Sequencer {
    next: Option<u64>,
    held: BTreeMap<u64, Message>,
    max_held: usize,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    pub fn new() -> Self {
        Sequencer {
            next: None,
            held: BTreeMap::new(),
            max_held: DEFAULT_MAX_HELD,
        }
    }

    /// Start the sequence at `first` instead of at the first frame seen.
    pub fn starting_at(first: u64) -> Self {
        Sequencer {
            next: Some(first),
            ..Self::new()
        }
    }

    pub fn with_max_held(mut self, max_held: usize) -> Self {
        self.max_held = max_held;
        self
    }

    /// Accept one frame and return every frame now ready for delivery.
    ///
    /// Fails once more than `max_held` frames wait behind the same gap.
    pub fn push(&mut self, message: Message) -> Result<Vec<Message>, SequenceError> {
        let Some(seq) = message.seq else {
            return Ok(vec![message]);
        };

        let next = *self.next.get_or_insert(seq);
        if seq < next {
            tracing::warn!(seq, next, "dropping duplicate frame");
            return Ok(Vec::new());
        }
        self.held.insert(seq, message);

        let mut ready = Vec::new();
        let mut cursor = next;
        while let Some(message) = self.held.remove(&cursor) {
            ready.push(message);
            cursor += 1;
        }
        self.next = Some(cursor);

        if self.held.len() > self.max_held {
            return Err(SequenceError {
                missing: cursor,
                held: self.held.len(),
            });
        }
        Ok(ready)
    }

    /// Frames waiting behind a gap.
    pub fn pending(&self) -> usize {
        self.held.len()
    }

    pub fn next_expected(&self) -> Option<u64> {
        self.next
    }
}
