// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    any::Any,
    sync::Arc,
};

//==============================================================================
// Exports
//==============================================================================

pub mod consts;
pub mod types;

pub use self::types::{
    PacketView,
    PayloadPtr,
};

/// Shared handle on the memory behind the packets of a burst. Addresses taken
/// from the burst stay readable while a handle is held.
pub type BurstMemory = Arc<dyn Any + Send + Sync>;

//==============================================================================
// Traits
//==============================================================================

/// Burst
///
/// Read-only view over a group of packets delivered together by the network
/// receive subsystem. The packet bytes are owned by the receive subsystem and are
/// never copied by the aggregator in pointer-gather mode.
pub trait Burst {
    /// Returns the receive queue this burst arrived on.
    fn queue_id(&self) -> u16;
    /// Returns the number of packets in the target [Burst].
    fn num_packets(&self) -> usize;
    /// Returns a view over the packet at `idx`, headers included. Views must
    /// cover readable memory.
    fn packet(&self, idx: usize) -> PacketView<'_>;
    /// Returns a view over segment `seg` of the packet at `idx`.
    ///
    /// Receive paths that split headers from data place the payload in
    /// segment 1. Unsplit receive paths only have segment 0.
    fn segment(&self, idx: usize, seg: usize) -> Option<PacketView<'_>> {
        match seg {
            0 => Some(self.packet(idx)),
            _ => None,
        }
    }
    /// Returns the number of bytes carried by all packets in the target [Burst].
    fn total_bytes(&self) -> u64;
    /// Returns a handle on the memory backing the target [Burst], if the receive
    /// subsystem shares it. Gathering aggregators hold on to it until every
    /// batch staged from the burst completes.
    fn memory(&self) -> Option<BurstMemory> {
        None
    }
}

/// Burst Source
///
/// Network receive subsystem feeding the aggregator.
pub trait BurstSource {
    type Burst: Burst;

    /// Pulls the next available burst, if any.
    fn receive(&mut self) -> Option<Self::Burst>;
    /// Releases the receive subsystem.
    fn shutdown(&mut self);
    /// Prints receive statistics of the subsystem itself.
    fn print_stats(&self);
}
