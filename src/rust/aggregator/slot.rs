// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use super::config::{
    RxConfig,
    StagingMode,
};
use crate::runtime::{
    fail::Fail,
    gpu::{
        DeviceBufferId,
        EventId,
        GatherEngine,
        StreamId,
    },
    network::{
        BurstMemory,
        PayloadPtr,
    },
};
use ::std::sync::Arc;

//==============================================================================
// Structures
//==============================================================================

/// Batch Slot
///
/// Reusable staging area for one batch. Cycles through empty, accumulating,
/// in flight and complete; the aggregator never touches a slot while its batch
/// is in flight.
pub struct BatchSlot {
    /// Payload pointers handed to the gather.
    pub ptrs: Vec<PayloadPtr>,
    /// Burst memory the staged pointers point into.
    pub memory: Vec<BurstMemory>,
    /// Host staging buffer, only present when staging by copy.
    pub staging: Option<Vec<u8>>,
    /// Contiguous output of the batch.
    pub device: DeviceBufferId,
    pub stream: StreamId,
    /// Signalled when the batch's work completes.
    pub done: EventId,
    /// Recorded ahead of the work when timing launches.
    pub start: EventId,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Batch Slots
impl BatchSlot {
    /// Allocates every resource of a slot and warms up its stream.
    pub fn new<E: GatherEngine>(engine: &mut E, config: &RxConfig) -> Result<Self, Fail> {
        let batch_bytes: usize = config.batch_bytes();

        let mut ptrs: Vec<PayloadPtr> = Vec::new();
        if ptrs.try_reserve_exact(config.batch_size).is_err() {
            return Err(Fail::new(libc::ENOMEM, "cannot allocate pointer array"));
        }
        let staging: Option<Vec<u8>> = match config.staging {
            StagingMode::Gather => None,
            StagingMode::HostCopy => {
                let mut buf: Vec<u8> = Vec::new();
                if buf.try_reserve_exact(batch_bytes).is_err() {
                    return Err(Fail::new(libc::ENOMEM, "cannot allocate staging buffer"));
                }
                buf.resize(batch_bytes, 0);
                Some(buf)
            },
        };

        let stream: StreamId = engine.create_stream()?;
        let device: DeviceBufferId = engine.alloc_device(batch_bytes)?;
        let done: EventId = engine.create_event()?;
        let start: EventId = engine.create_event()?;

        // An empty gather pays the first-launch cost here rather than on the first batch.
        engine.gather(device, &[], config.nominal_payload_size(), stream)?;
        engine.synchronize_stream(stream)?;

        Ok(Self {
            ptrs,
            memory: Vec::new(),
            staging,
            device,
            stream,
            done,
            start,
        })
    }

    /// Number of packets staged so far.
    pub fn len(&self) -> usize {
        self.ptrs.len()
    }

    /// Holds on to the memory of a burst staged into the slot. Consecutive
    /// packets of one burst share a single handle.
    pub fn retain(&mut self, memory: &BurstMemory) {
        let known: bool = match self.memory.last() {
            Some(last) => Arc::as_ptr(last) as *const u8 == Arc::as_ptr(memory) as *const u8,
            None => false,
        };
        if !known {
            self.memory.push(memory.clone());
        }
    }

    /// Forgets every staged packet.
    pub fn clear(&mut self) {
        self.ptrs.clear();
        self.memory.clear();
    }
}
