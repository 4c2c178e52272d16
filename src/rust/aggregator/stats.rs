// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::fmt;

//==============================================================================
// Structures
//==============================================================================

/// Receive Statistics
///
/// Monotonic counters kept by the aggregator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxStats {
    /// Packets received on payload queues.
    pub total_packets_received: u64,
    /// Bytes received on payload queues.
    pub total_bytes_received: u64,
    /// Received packets that never reach a launched batch: the remainder of a
    /// burst cut short by a failed launch, and the contents of dropped batches.
    pub packets_dropped: u64,
    pub batches_launched: u64,
    /// Launched batches observed as complete.
    pub batches_completed: u64,
    /// Batches discarded because every slot was in flight.
    pub batches_dropped: u64,
    pub control_bursts_ignored: u64,
    /// Steps that found no burst to process.
    pub empty_steps: u64,
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for RxStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} bytes/packets received ({} packets dropped), {} batches launched ({} completed, {} dropped)",
            self.total_bytes_received,
            self.total_packets_received,
            self.packets_dropped,
            self.batches_launched,
            self.batches_completed,
            self.batches_dropped
        )
    }
}
