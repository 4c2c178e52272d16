// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Synthetic receive subsystem.
//!
//! Generates UDP/IPv4 packets into a fixed ring of packet buffers and hands
//! them out in bursts, the way a NIC receive queue would. Bursts share the ring
//! with their source and keep it allocated, but buffers are reused once the
//! ring wraps, so a burst only holds its own packets until `ring_size` more
//! packets have been generated.
//!
//! Every packet starts with the same Ethernet II, IPv4 and UDP headers, which
//! take [DEFAULT_HEADER_SIZE] bytes.

mod packet;

//==============================================================================
// Imports
//==============================================================================

use crate::{
    aggregator::{
        RxConfig,
        StagingMode,
    },
    runtime::{
        fail::Fail,
        network::{
            consts::{
                CONTROL_QUEUE_ID,
                DEFAULT_HEADER_SIZE,
                DEFAULT_MAX_PACKET_SIZE,
                MAX_BURST_SIZE,
            },
            Burst,
            BurstMemory,
            BurstSource,
            PacketView,
            PayloadPtr,
        },
    },
};
use ::arrayvec::ArrayVec;
use ::rand::{
    prelude::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    cmp,
    ptr::NonNull,
    slice,
    sync::Arc,
};

//==============================================================================
// Exports
//==============================================================================

pub use self::packet::{
    stamp_payload,
    verify_payload,
    write_packet,
    CONTROL_SEQ,
    MIN_PAYLOAD_SIZE,
    RX_UDP_PORT_BASE,
};

//==============================================================================
// Structures
//==============================================================================

/// Synthetic Source Configuration
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Data packets to generate before running dry. Unbounded if `None`.
    pub num_packets: Option<u64>,
    /// Largest number of packets in a burst.
    pub burst_size: usize,
    /// Bytes reserved for each packet in the ring.
    pub packet_size: usize,
    /// Payloads are shortened by up to this many bytes at random.
    pub payload_jitter: usize,
    /// Data queues are numbered from 1 to `num_queues`.
    pub num_queues: u16,
    /// Emit a burst on the control queue every this many bursts.
    pub control_interval: Option<u64>,
    /// Number of packet buffers in the ring.
    pub ring_size: usize,
    /// Deliver payloads as a separate segment.
    pub header_data_split: bool,
    pub seed: u64,
}

/// Counters of a [SyntheticSource].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub bursts: u64,
    pub control_bursts: u64,
    pub packets: u64,
    pub bytes: u64,
}

/// Packet buffers shared by a source and the bursts it hands out.
///
/// Bytes are only written by the owning [SyntheticSource], through raw
/// pointers, so that readers of other buffers are never aliased by a
/// reference to the whole ring.
struct PacketRing {
    bytes: NonNull<[u8]>,
}

/// Synthetic Source
pub struct SyntheticSource {
    config: SourceConfig,
    ring: Arc<PacketRing>,
    next_buffer: usize,
    next_seq: u64,
    rng: SmallRng,
    stats: SourceStats,
    shut_down: bool,
}

/// Burst handed out by a [SyntheticSource].
///
/// Packets carry [DEFAULT_HEADER_SIZE] bytes of headers. With header-data
/// split, segment 0 covers exactly those headers and segment 1 the payload.
pub struct SyntheticBurst {
    queue_id: u16,
    packets: ArrayVec<(PayloadPtr, usize), MAX_BURST_SIZE>,
    header_data_split: bool,
    total_bytes: u64,
    ring: Arc<PacketRing>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl SourceConfig {
    /// Checks that generated packets fit their buffers and that a burst never
    /// wraps the ring onto itself.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.burst_size == 0 || self.burst_size > MAX_BURST_SIZE {
            return Err(Fail::new(libc::EINVAL, "burst size out of range"));
        }
        if self.num_queues == 0 {
            return Err(Fail::new(libc::EINVAL, "need at least one data queue"));
        }
        if self.packet_size > u16::MAX as usize {
            return Err(Fail::new(libc::EINVAL, "packet size out of range"));
        }
        if self.packet_size < self.header_size() + MIN_PAYLOAD_SIZE + self.payload_jitter {
            return Err(Fail::new(libc::EINVAL, "packet size too small for payload"));
        }
        if self.ring_size < self.burst_size {
            return Err(Fail::new(libc::EINVAL, "ring smaller than a burst"));
        }
        Ok(())
    }

    /// Checks that an aggregator configured by `rx` reads payloads where the
    /// generated packets have them.
    pub fn validate_for(&self, rx: &RxConfig) -> Result<(), Fail> {
        if rx.header_size != self.header_size() {
            return Err(Fail::new(libc::EINVAL, "synthetic packets carry a different header size"));
        }
        // Gathers read a full stride from each payload.
        if rx.staging == StagingMode::Gather && self.packet_size < rx.max_packet_size {
            return Err(Fail::new(libc::EINVAL, "packet buffers smaller than the aggregator packet size"));
        }
        Ok(())
    }

    /// Size of the headers in front of every payload (in bytes).
    pub fn header_size(&self) -> usize {
        DEFAULT_HEADER_SIZE
    }

    /// Payload size of a packet without jitter (in bytes).
    pub fn payload_size(&self) -> usize {
        self.packet_size - self.header_size()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            num_packets: None,
            burst_size: 32,
            packet_size: DEFAULT_MAX_PACKET_SIZE,
            payload_jitter: 0,
            num_queues: 4,
            control_interval: None,
            ring_size: 4096,
            header_data_split: false,
            seed: 0,
        }
    }
}

impl PacketRing {
    fn new(len: usize) -> Result<Self, Fail> {
        let mut bytes: Vec<u8> = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            return Err(Fail::new(libc::ENOMEM, "cannot allocate packet ring"));
        }
        bytes.resize(len, 0);
        Ok(Self {
            bytes: NonNull::from(Box::leak(bytes.into_boxed_slice())),
        })
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the address of the byte at `offset`.
    fn at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.len());
        self.bytes.as_ptr().cast::<u8>().wrapping_add(offset)
    }
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self, Fail> {
        config.validate()?;
        let ring: PacketRing = PacketRing::new(config.ring_size * config.packet_size)?;
        debug!(
            "SyntheticSource::new(): ring_size={} packet_size={}",
            config.ring_size, config.packet_size
        );

        Ok(Self {
            rng: SmallRng::seed_from_u64(config.seed),
            config,
            ring: Arc::new(ring),
            next_buffer: 0,
            next_seq: 0,
            stats: SourceStats::default(),
            shut_down: false,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    /// Sequence number of the next data packet.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Whether every data packet was generated.
    pub fn is_exhausted(&self) -> bool {
        match self.config.num_packets {
            Some(n) => self.next_seq >= n,
            None => false,
        }
    }

    fn is_control_turn(&self) -> bool {
        match self.config.control_interval {
            Some(0) | None => false,
            Some(n) => (self.stats.bursts + 1) % n == 0,
        }
    }

    /// Writes one packet into the next ring buffer.
    fn generate(&mut self, queue_id: u16, seq: u64) -> (PayloadPtr, usize) {
        let payload_len: usize = match self.config.payload_jitter {
            0 => self.config.payload_size(),
            jitter => self.config.payload_size() - self.rng.gen_range(0..=jitter),
        };
        let packet_size: usize = self.config.packet_size;
        let offset: usize = self.next_buffer * packet_size;
        self.next_buffer = (self.next_buffer + 1) % self.config.ring_size;

        debug_assert!(offset + packet_size <= self.ring.len());
        // Safety: the buffer lies within the ring and this source is its only
        // writer. It is handed out again only after `ring_size` newer packets.
        let buf: &mut [u8] = unsafe { slice::from_raw_parts_mut(self.ring.at(offset), packet_size) };
        let len: usize = write_packet(buf, queue_id, seq, payload_len);
        (PayloadPtr::from_ptr(buf.as_ptr()), len)
    }
}

impl SyntheticBurst {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Drop for PacketRing {
    fn drop(&mut self) {
        // Safety: `bytes` came out of a leaked box and nothing else frees it.
        unsafe { drop(Box::from_raw(self.bytes.as_ptr())) }
    }
}

// Safety: the ring is plain bytes; writers go through the owning source only.
unsafe impl Send for PacketRing {}
unsafe impl Sync for PacketRing {}

impl BurstSource for SyntheticSource {
    type Burst = SyntheticBurst;

    fn receive(&mut self) -> Option<SyntheticBurst> {
        if self.shut_down {
            return None;
        }

        let control: bool = self.is_control_turn();
        let num_packets: usize = match (control, self.config.num_packets) {
            (true, _) => self.rng.gen_range(1..=self.config.burst_size),
            (false, None) => self.rng.gen_range(1..=self.config.burst_size),
            (false, Some(n)) => {
                let remaining: u64 = n.saturating_sub(self.next_seq);
                if remaining == 0 {
                    return None;
                }
                let max: usize = cmp::min(remaining, self.config.burst_size as u64) as usize;
                self.rng.gen_range(1..=max)
            },
        };
        let queue_id: u16 = match control {
            true => CONTROL_QUEUE_ID,
            false => self.rng.gen_range(1..=self.config.num_queues),
        };

        let mut packets: ArrayVec<(PayloadPtr, usize), MAX_BURST_SIZE> = ArrayVec::new();
        let mut total_bytes: u64 = 0;
        for _ in 0..num_packets {
            let seq: u64 = match control {
                true => CONTROL_SEQ,
                false => {
                    let seq: u64 = self.next_seq;
                    self.next_seq += 1;
                    seq
                },
            };
            let (addr, len): (PayloadPtr, usize) = self.generate(queue_id, seq);
            total_bytes += len as u64;
            packets.push((addr, len));
        }

        self.stats.bursts += 1;
        self.stats.packets += num_packets as u64;
        self.stats.bytes += total_bytes;
        if control {
            self.stats.control_bursts += 1;
        }
        trace!("receive(): queue={} packets={} bytes={}", queue_id, num_packets, total_bytes);

        Some(SyntheticBurst {
            queue_id,
            packets,
            header_data_split: self.config.header_data_split,
            total_bytes,
            ring: self.ring.clone(),
        })
    }

    fn shutdown(&mut self) {
        debug!("SyntheticSource::shutdown()");
        self.shut_down = true;
    }

    fn print_stats(&self) {
        info!(
            "synthetic source: {} bursts ({} control), {} packets, {} bytes",
            self.stats.bursts, self.stats.control_bursts, self.stats.packets, self.stats.bytes
        );
    }
}

impl Burst for SyntheticBurst {
    fn queue_id(&self) -> u16 {
        self.queue_id
    }

    fn num_packets(&self) -> usize {
        self.packets.len()
    }

    fn packet(&self, idx: usize) -> PacketView<'_> {
        let (addr, len): (PayloadPtr, usize) = self.packets[idx];
        // Safety: the burst keeps the ring alive and the buffer holds `len` written bytes.
        unsafe { PacketView::from_raw_parts(addr, len) }
    }

    fn segment(&self, idx: usize, seg: usize) -> Option<PacketView<'_>> {
        let (addr, len): (PayloadPtr, usize) = self.packets[idx];
        match (seg, self.header_data_split) {
            (0, false) => Some(self.packet(idx)),
            (0, true) => Some(unsafe { PacketView::from_raw_parts(addr, DEFAULT_HEADER_SIZE) }),
            (1, true) => Some(unsafe {
                PacketView::from_raw_parts(addr.offset(DEFAULT_HEADER_SIZE), len - DEFAULT_HEADER_SIZE)
            }),
            _ => None,
        }
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn memory(&self) -> Option<BurstMemory> {
        let memory: BurstMemory = self.ring.clone();
        Some(memory)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
