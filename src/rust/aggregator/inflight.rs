// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    gpu::{
        EventId,
        GatherEngine,
    },
    network::BurstMemory,
};
use ::std::collections::VecDeque;

//==============================================================================
// Structures
//==============================================================================

/// Batch whose work was submitted but not yet observed as complete.
pub struct InFlightBatch {
    /// Signalled when the batch's work completes.
    pub done: EventId,
    /// Logical index of the batch since startup.
    pub batch_index: u64,
    /// Slot holding the batch.
    pub slot: usize,
    /// Burst memory the batch reads from, released once the batch is reclaimed.
    pub memory: Vec<BurstMemory>,
}

/// In-Flight Queue
///
/// FIFO of launched batches, bounded by the number of slots. Its length is the
/// only backpressure signal of the pipeline.
pub struct InFlightQueue {
    batches: VecDeque<InFlightBatch>,
    capacity: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for In-Flight Queues
impl InFlightQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pops completed batches off the head of the queue.
    ///
    /// Stops at the first batch that has not completed, even if batches behind
    /// it already have. Returns the number of batches popped.
    pub fn reclaim<E: GatherEngine>(&mut self, engine: &E) -> usize {
        let mut reclaimed: usize = 0;
        while let Some(head) = self.batches.front() {
            if !engine.query_event(head.done) {
                break;
            }
            trace!("reclaim(): batch={:?} slot={:?}", head.batch_index, head.slot);
            self.batches.pop_front();
            reclaimed += 1;
        }
        reclaimed
    }

    /// Appends a launched batch.
    ///
    /// Callers must check [InFlightQueue::is_full] first.
    pub fn push(&mut self, batch: InFlightBatch) {
        debug_assert!(!self.is_full());
        self.batches.push_back(batch);
    }

    pub fn is_full(&self) -> bool {
        self.batches.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Iterates over in-flight batches, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &InFlightBatch> {
        self.batches.iter()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
