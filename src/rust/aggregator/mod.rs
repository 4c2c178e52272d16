// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! # Receive Batch Aggregator
//!
//! Stages packets from incoming bursts into a ring of batch slots and, once a
//! slot holds `batch_size` packets, offloads the reordering of their payloads
//! into a contiguous buffer to a [GatherEngine]. Up to `num_concurrent` batches
//! are in flight at once; a launch that finds every slot in flight is handled
//! according to the configured [OverflowPolicy].
//!
//! The aggregator is a plain step function. It spawns no threads and never
//! blocks on the engine, except when a launch observer is installed.

pub mod config;
mod inflight;
mod slot;
mod stats;

//==============================================================================
// Imports
//==============================================================================

use self::{
    inflight::{
        InFlightBatch,
        InFlightQueue,
    },
    slot::BatchSlot,
};
use crate::{
    runtime::{
        fail::Fail,
        gpu::{
            DeviceBufferId,
            EventId,
            GatherEngine,
        },
        network::{
            Burst,
            BurstMemory,
            BurstSource,
            PacketView,
            PayloadPtr,
        },
    },
    rxlog::rx_log,
};
use ::std::{
    cmp,
    mem,
    time::Duration,
};

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    config::{
        OverflowPolicy,
        RxConfig,
        StagingMode,
    },
    stats::RxStats,
};

//==============================================================================
// Structures
//==============================================================================

/// Result of a single [RxAggregator::step].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No burst was available.
    NoInput,
    /// The burst arrived on the control queue and was ignored.
    Ignored,
    /// The burst was aggregated, completing `launched` batches.
    Aggregated { packets: usize, launched: usize },
}

/// Timing of one launch, reported to launch observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchTiming {
    pub batch_index: u64,
    pub slot: usize,
    pub packets: usize,
    /// Size of the contiguous output (in bytes).
    pub bytes: usize,
    /// Time the engine spent on the batch.
    pub elapsed: Duration,
}

/// Receive Batch Aggregator
pub struct RxAggregator<E: GatherEngine> {
    config: RxConfig,
    /// Dropped ahead of `slots` and `inflight`, so streams stop reading before
    /// the burst memory they hold is released.
    engine: E,
    slots: Vec<BatchSlot>,
    inflight: InFlightQueue,
    /// Slot currently accumulating packets.
    current_slot: usize,
    /// Logical index of the next batch to launch.
    next_batch_index: u64,
    stats: RxStats,
    observer: Option<Box<dyn FnMut(&LaunchTiming)>>,
    /// Set once the engine reported a fault.
    faulted: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Receive Batch Aggregators
impl<E: GatherEngine> RxAggregator<E> {
    /// Allocates every batch slot on `engine`.
    ///
    /// Failing to allocate any slot resource is not recoverable; the caller is
    /// expected to give up.
    pub fn new(config: RxConfig, mut engine: E) -> Result<Self, Fail> {
        config.validate()?;
        info!(
            "RxAggregator::new(): batch_size={} payload_size={} num_concurrent={} staging={:?}",
            config.batch_size,
            config.nominal_payload_size(),
            config.num_concurrent,
            config.staging
        );

        let mut slots: Vec<BatchSlot> = Vec::with_capacity(config.num_concurrent);
        for i in 0..config.num_concurrent {
            match BatchSlot::new(&mut engine, &config) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    error!("failed to allocate batch slot {} ({:?})", i, e);
                    return Err(e);
                },
            }
        }

        debug!("RxAggregator::new(): complete");
        Ok(Self {
            inflight: InFlightQueue::new(config.num_concurrent),
            config,
            engine,
            slots,
            current_slot: 0,
            next_batch_index: 0,
            stats: RxStats::default(),
            observer: None,
            faulted: false,
        })
    }

    /// Installs a launch observer. Every launch then waits for its batch to
    /// complete so that the engine time can be measured.
    pub fn set_launch_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&LaunchTiming) + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    /// Removes the launch observer, restoring fully asynchronous launches.
    pub fn clear_launch_observer(&mut self) {
        self.observer = None;
    }

    /// Processes one burst.
    ///
    /// The burst is only borrowed for the duration of the call, but payload
    /// addresses staged from it are read by the engine later on. Bursts that
    /// share their [BurstMemory] are kept readable until their batches complete;
    /// for the others see [PacketView] for the obligation on the receive subsystem.
    ///
    /// A failed launch leaves the rest of the burst unstaged. Those packets are
    /// counted in [RxStats::packets_dropped].
    pub fn step<B: Burst>(&mut self, burst: Option<&B>) -> Result<StepOutcome, Fail> {
        if self.faulted {
            return Err(Fail::new(libc::EIO, "aggregator stopped after an engine fault"));
        }

        self.reclaim();

        let burst: &B = match burst {
            Some(burst) => burst,
            None => {
                error!("No burst input");
                self.stats.empty_steps += 1;
                return Ok(StepOutcome::NoInput);
            },
        };

        if burst.queue_id() == self.config.control_queue_id {
            self.stats.control_bursts_ignored += 1;
            return Ok(StepOutcome::Ignored);
        }

        let num_packets: usize = burst.num_packets();
        self.stats.total_packets_received += num_packets as u64;

        // Host copies are done reading by the end of the step.
        let memory: Option<BurstMemory> = match self.config.staging {
            StagingMode::Gather => burst.memory(),
            StagingMode::HostCopy => None,
        };

        let mut launched: usize = 0;
        for idx in 0..num_packets {
            // A slot left full by a refused launch is retried before it takes more packets.
            if self.current_is_full() {
                match self.launch() {
                    Ok(n) => launched += n,
                    Err(e) => return Err(self.abandon(e, num_packets - idx)),
                }
            }
            self.stage(burst, idx, memory.as_ref());
            if self.current_is_full() {
                match self.launch() {
                    Ok(n) => launched += n,
                    Err(e) => return Err(self.abandon(e, num_packets - idx - 1)),
                }
            }
        }

        self.stats.total_bytes_received += burst.total_bytes();
        Ok(StepOutcome::Aggregated {
            packets: num_packets,
            launched,
        })
    }

    /// Reports final totals and releases the receive subsystem.
    ///
    /// Packets staged in a slot that never filled are discarded.
    pub fn shutdown<S: BurstSource>(mut self, source: &mut S) -> RxStats {
        self.reclaim();
        let staged: usize = self.aggregated();
        if staged > 0 {
            debug!("shutdown(): discarding {} staged packets", staged);
        }
        if !self.inflight.is_empty() {
            debug!("shutdown(): {} batches still in flight", self.inflight.len());
        }
        info!(
            "Finished receiver with {}/{} bytes/packets received",
            self.stats.total_bytes_received, self.stats.total_packets_received
        );
        info!("rx aggregator shutting down");
        source.shutdown();
        source.print_stats();
        self.stats
    }

    /// Pops batches whose work completed off the in-flight queue.
    pub fn reclaim(&mut self) -> usize {
        let reclaimed: usize = self.inflight.reclaim(&self.engine);
        self.stats.batches_completed += reclaimed as u64;
        reclaimed
    }

    /// Blocks until every in-flight batch completes. Returns the number of
    /// batches reclaimed.
    pub fn wait_idle(&mut self) -> Result<usize, Fail> {
        let pending: Vec<EventId> = self.inflight.iter().map(|batch| batch.done).collect();
        for done in pending {
            if let Err(e) = self.engine.synchronize_event(done) {
                return Err(self.fault(e));
            }
        }
        if let Err(e) = self.engine.last_error() {
            return Err(self.fault(e));
        }
        Ok(self.reclaim())
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Number of packets staged in the current slot.
    pub fn aggregated(&self) -> usize {
        self.slots[self.current_slot].len()
    }

    /// Index of the slot currently accumulating packets.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of batches launched but not yet observed as complete.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Payload addresses staged in a slot.
    pub fn staged(&self, slot: usize) -> Option<&[PayloadPtr]> {
        self.slots.get(slot).map(|slot| slot.ptrs.as_slice())
    }

    /// Device buffer receiving the output of a slot.
    pub fn device_buffer(&self, slot: usize) -> Option<DeviceBufferId> {
        self.slots.get(slot).map(|slot| slot.device)
    }

    /// Whether the engine reported a fault.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    fn current_is_full(&self) -> bool {
        self.aggregated() >= self.config.batch_size
    }

    /// Stages packet `idx` of `burst` into the current slot.
    fn stage<B: Burst>(&mut self, burst: &B, idx: usize, memory: Option<&BurstMemory>) {
        let header_size: usize = self.config.header_size;
        let stride: usize = self.config.nominal_payload_size();

        // With header-data split the payload is a segment of its own.
        let split: Option<PacketView> = match self.config.header_data_split {
            true => burst.segment(idx, 1),
            false => None,
        };
        let (view, skip): (PacketView, usize) = match split {
            Some(view) => (view, 0),
            None => (burst.packet(idx), header_size),
        };

        let slot: &mut BatchSlot = &mut self.slots[self.current_slot];
        if let Some(staging) = slot.staging.as_mut() {
            let offset: usize = slot.ptrs.len() * stride;
            // Safety: bursts hand out views over readable memory.
            let payload: &[u8] = unsafe { view.payload(skip) };
            let nbytes: usize = cmp::min(payload.len(), stride);
            staging[offset..offset + nbytes].copy_from_slice(&payload[..nbytes]);
            // Short payloads must not expose bytes of an earlier batch.
            staging[offset + nbytes..offset + stride].fill(0);
        }
        slot.ptrs.push(view.addr().offset(skip));
        if let Some(memory) = memory {
            slot.retain(memory);
        }
    }

    /// Launches the current slot. Returns the number of batches launched.
    fn launch(&mut self) -> Result<usize, Fail> {
        // Batches may have completed since the beginning of the step.
        self.reclaim();

        if self.inflight.is_full() {
            return self.overflow();
        }

        let slot_idx: usize = self.current_slot;
        let batch_index: u64 = self.next_batch_index;
        let packets: usize = self.slots[slot_idx].len();
        rx_log!("launch(): batch={} slot={} packets={}", batch_index, slot_idx, packets);

        let submitted: Result<(), Fail> = self.submit(slot_idx);
        if submitted.is_ok() {
            self.inflight.push(InFlightBatch {
                done: self.slots[slot_idx].done,
                batch_index,
                slot: slot_idx,
                memory: mem::take(&mut self.slots[slot_idx].memory),
            });
        }
        if let Err(e) = submitted.and_then(|()| self.engine.last_error()) {
            return Err(self.fault(e));
        }

        if self.observer.is_some() {
            if let Err(e) = self.observe(slot_idx, batch_index, packets) {
                return Err(self.fault(e));
            }
        }

        self.slots[slot_idx].clear();
        self.current_slot = (slot_idx + 1) % self.slots.len();
        self.next_batch_index += 1;
        self.stats.batches_launched += 1;
        Ok(1)
    }

    /// Queues the work of a slot on its stream.
    fn submit(&mut self, slot_idx: usize) -> Result<(), Fail> {
        let timed: bool = self.observer.is_some();
        let stride: usize = self.config.nominal_payload_size();
        let slot: &BatchSlot = &self.slots[slot_idx];

        if timed {
            self.engine.record_event(slot.start, slot.stream)?;
        }
        match slot.staging.as_ref() {
            None => self.engine.gather(slot.device, &slot.ptrs, stride, slot.stream)?,
            Some(staging) => {
                let nbytes: usize = slot.ptrs.len() * stride;
                self.engine.copy_to_device(slot.device, &staging[..nbytes], slot.stream)?
            },
        }
        self.engine.record_event(slot.done, slot.stream)
    }

    /// Waits for a launched batch and reports its timing.
    fn observe(&mut self, slot_idx: usize, batch_index: u64, packets: usize) -> Result<(), Fail> {
        let (start, done) = (self.slots[slot_idx].start, self.slots[slot_idx].done);
        self.engine.synchronize_event(done)?;
        let elapsed: Duration = self.engine.elapsed(start, done)?;
        let timing: LaunchTiming = LaunchTiming {
            batch_index,
            slot: slot_idx,
            packets,
            bytes: packets * self.config.nominal_payload_size(),
            elapsed,
        };
        debug!("observe(): aggregated={} elapsed={:?}", packets, elapsed);
        if let Some(observer) = self.observer.as_mut() {
            observer(&timing);
        }
        Ok(())
    }

    /// Handles a launch that found every slot in flight.
    fn overflow(&mut self) -> Result<usize, Fail> {
        match self.config.overflow_policy {
            OverflowPolicy::Fail => {
                error!("Fell behind in processing on GPU!");
                Err(Fail::new(libc::EBUSY, "fell behind in processing on GPU"))
            },
            OverflowPolicy::DropBatch => {
                warn!(
                    "Fell behind in processing on GPU, dropping {} packets of slot {}",
                    self.aggregated(),
                    self.current_slot
                );
                self.stats.packets_dropped += self.aggregated() as u64;
                self.slots[self.current_slot].clear();
                self.stats.batches_dropped += 1;
                Ok(0)
            },
            OverflowPolicy::Abort => {
                error!("Fell behind in processing on GPU!");
                ::std::process::abort()
            },
        }
    }

    /// Counts the packets of a burst that a failed launch left unstaged.
    fn abandon(&mut self, e: Fail, unstaged: usize) -> Fail {
        if unstaged == 0 {
            return e;
        }
        warn!("abandoning {} unstaged packets of the current burst", unstaged);
        self.stats.packets_dropped += unstaged as u64;
        Fail::new(e.errno, &format!("{} ({} packets not staged)", e.cause, unstaged))
    }

    /// Marks the aggregator as faulted and converts an engine failure.
    fn fault(&mut self, e: Fail) -> Fail {
        error!(
            "Engine error with {} packets in batch and {} bytes total ({:?})",
            self.config.batch_size,
            self.config.batch_bytes(),
            e
        );
        self.faulted = true;
        Fail::new(libc::EIO, &format!("engine fault: {}", e.cause))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
