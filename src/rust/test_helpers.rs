// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    gpu::{
        DeviceBufferId,
        EventId,
        GatherEngine,
        StreamId,
    },
    network::{
        Burst,
        BurstMemory,
        BurstSource,
        PacketView,
        PayloadPtr,
    },
};
use ::std::{
    cell::Cell,
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// Work submitted to a [ScriptedEngine].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Gather {
        dst: DeviceBufferId,
        ptrs: Vec<PayloadPtr>,
        stride: usize,
        stream: StreamId,
    },
    Copy {
        dst: DeviceBufferId,
        bytes: Vec<u8>,
        stream: StreamId,
    },
}

/// Engine that records submissions and whose events complete when the test says so.
pub struct ScriptedEngine {
    next_handle: usize,
    streams: Vec<StreamId>,
    device_sizes: Vec<usize>,
    allocations_left: Option<usize>,
    /// Recorded events that have not completed, oldest first.
    pending: VecDeque<EventId>,
    /// Whether recorded events stay pending.
    hold: bool,
    refuse: bool,
    submissions: Vec<Submission>,
    warmups: usize,
    synchronizations: usize,
    fault: Option<Fail>,
    elapsed: Duration,
}

/// Burst backed by test memory or by made-up addresses.
pub struct MemoryBurst {
    queue_id: u16,
    packets: Vec<(PayloadPtr, usize)>,
    split: Option<Vec<(PayloadPtr, usize)>>,
    total_bytes: u64,
    data: Arc<Vec<Vec<u8>>>,
}

/// Source that never has a burst to offer.
#[derive(Default)]
pub struct NullSource {
    pub shut_down: bool,
    pub stats_printed: Cell<bool>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            streams: Vec::new(),
            device_sizes: Vec::new(),
            allocations_left: None,
            pending: VecDeque::new(),
            hold: false,
            refuse: false,
            submissions: Vec::new(),
            warmups: 0,
            synchronizations: 0,
            fault: None,
            elapsed: Duration::ZERO,
        }
    }

    fn handle(&mut self) -> usize {
        let handle: usize = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Keeps recorded events pending until completed explicitly.
    pub fn hold_completions(&mut self, hold: bool) {
        self.hold = hold;
    }

    /// Makes gathers and copies fail at submission.
    pub fn refuse_submissions(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    /// Lets `n` more device allocations succeed.
    pub fn fail_allocations_after(&mut self, n: usize) {
        self.allocations_left = Some(n);
    }

    pub fn inject_fault(&mut self, e: Fail) {
        self.fault = Some(e);
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn set_pending(&mut self, event: EventId) {
        self.complete(event);
        self.pending.push_back(event);
    }

    pub fn complete(&mut self, event: EventId) {
        self.pending.retain(|e| *e != event);
    }

    pub fn complete_oldest(&mut self) {
        self.pending.pop_front();
    }

    pub fn complete_all(&mut self) {
        self.pending.clear();
    }

    pub fn streams(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, idx: usize) -> StreamId {
        self.streams[idx]
    }

    pub fn device_sizes(&self) -> Vec<usize> {
        self.device_sizes.clone()
    }

    pub fn warmups(&self) -> usize {
        self.warmups
    }

    pub fn synchronizations(&self) -> usize {
        self.synchronizations
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Payload addresses of every gather, in submission order.
    pub fn gathers(&self) -> Vec<Vec<PayloadPtr>> {
        self.submissions
            .iter()
            .filter_map(|s| match s {
                Submission::Gather { ptrs, .. } => Some(ptrs.clone()),
                Submission::Copy { .. } => None,
            })
            .collect()
    }

    /// Bytes of every copy, in submission order.
    pub fn copies(&self) -> Vec<Vec<u8>> {
        self.submissions
            .iter()
            .filter_map(|s| match s {
                Submission::Copy { bytes, .. } => Some(bytes.clone()),
                Submission::Gather { .. } => None,
            })
            .collect()
    }
}

impl MemoryBurst {
    /// Creates a burst whose packets sit at made-up addresses. Only usable with
    /// engines that never dereference them.
    pub fn synthetic(queue_id: u16, addrs: &[u64], total_bytes: u64) -> Self {
        Self {
            queue_id,
            packets: addrs.iter().map(|addr| (PayloadPtr::new(*addr as usize), 0)).collect(),
            split: None,
            total_bytes,
            data: Arc::new(Vec::new()),
        }
    }

    /// Creates a burst over real packet bytes.
    pub fn from_packets(queue_id: u16, data: Vec<Vec<u8>>) -> Self {
        let packets: Vec<(PayloadPtr, usize)> = data
            .iter()
            .map(|pkt| (PayloadPtr::from_ptr(pkt.as_ptr()), pkt.len()))
            .collect();
        let total_bytes: u64 = data.iter().map(|pkt| pkt.len() as u64).sum();
        Self {
            queue_id,
            packets,
            split: None,
            total_bytes,
            data: Arc::new(data),
        }
    }

    /// Number of handles on the packet bytes, the burst's own included.
    pub fn memory_handles(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Places packet payloads in a second segment at made-up addresses.
    pub fn with_split(mut self, addrs: &[u64]) -> Self {
        self.split = Some(addrs.iter().map(|addr| (PayloadPtr::new(*addr as usize), 0)).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl GatherEngine for ScriptedEngine {
    fn create_stream(&mut self) -> Result<StreamId, Fail> {
        let stream: StreamId = StreamId::from(self.handle());
        self.streams.push(stream);
        Ok(stream)
    }

    fn create_event(&mut self) -> Result<EventId, Fail> {
        Ok(EventId::from(self.handle()))
    }

    fn alloc_device(&mut self, len: usize) -> Result<DeviceBufferId, Fail> {
        match self.allocations_left {
            Some(0) => return Err(Fail::new(libc::ENOMEM, "out of device memory")),
            Some(ref mut n) => *n -= 1,
            None => (),
        }
        self.device_sizes.push(len);
        Ok(DeviceBufferId::from(self.handle()))
    }

    fn gather(&mut self, dst: DeviceBufferId, src: &[PayloadPtr], stride: usize, stream: StreamId)
        -> Result<(), Fail> {
        if self.refuse {
            return Err(Fail::new(libc::EINVAL, "launch refused"));
        }
        if src.is_empty() {
            self.warmups += 1;
            return Ok(());
        }
        self.submissions.push(Submission::Gather {
            dst,
            ptrs: src.to_vec(),
            stride,
            stream,
        });
        Ok(())
    }

    fn copy_to_device(&mut self, dst: DeviceBufferId, src: &[u8], stream: StreamId) -> Result<(), Fail> {
        if self.refuse {
            return Err(Fail::new(libc::EINVAL, "copy refused"));
        }
        self.submissions.push(Submission::Copy {
            dst,
            bytes: src.to_vec(),
            stream,
        });
        Ok(())
    }

    fn record_event(&mut self, event: EventId, _stream: StreamId) -> Result<(), Fail> {
        match self.hold {
            true => self.set_pending(event),
            false => self.complete(event),
        }
        Ok(())
    }

    fn query_event(&self, event: EventId) -> bool {
        !self.pending.contains(&event)
    }

    fn synchronize_event(&mut self, event: EventId) -> Result<(), Fail> {
        self.synchronizations += 1;
        self.complete(event);
        Ok(())
    }

    fn synchronize_stream(&mut self, _stream: StreamId) -> Result<(), Fail> {
        Ok(())
    }

    fn elapsed(&self, _start: EventId, _end: EventId) -> Result<Duration, Fail> {
        Ok(self.elapsed)
    }

    fn last_error(&mut self) -> Result<(), Fail> {
        match self.fault.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Burst for MemoryBurst {
    fn queue_id(&self) -> u16 {
        self.queue_id
    }

    fn num_packets(&self) -> usize {
        self.packets.len()
    }

    fn packet(&self, idx: usize) -> PacketView<'_> {
        let (addr, len): (PayloadPtr, usize) = self.packets[idx];
        // Safety: real packets are owned by `data`; made-up ones have no readable bytes.
        unsafe { PacketView::from_raw_parts(addr, len) }
    }

    fn segment(&self, idx: usize, seg: usize) -> Option<PacketView<'_>> {
        match (seg, self.split.as_ref()) {
            (0, _) => Some(self.packet(idx)),
            (1, Some(split)) => {
                let (addr, len): (PayloadPtr, usize) = split[idx];
                Some(unsafe { PacketView::from_raw_parts(addr, len) })
            },
            _ => None,
        }
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn memory(&self) -> Option<BurstMemory> {
        let memory: BurstMemory = self.data.clone();
        Some(memory)
    }
}

impl BurstSource for NullSource {
    type Burst = MemoryBurst;

    fn receive(&mut self) -> Option<MemoryBurst> {
        None
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }

    fn print_stats(&self) {
        self.stats_printed.set(true);
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Builds a list of payload pointers from raw addresses.
pub fn ptrs(addrs: &[u64]) -> Vec<PayloadPtr> {
    addrs.iter().map(|addr| PayloadPtr::new(*addr as usize)).collect()
}
