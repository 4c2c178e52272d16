// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod handles;
pub mod host;
mod table;

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    network::PayloadPtr,
};
use ::std::time::Duration;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    handles::{
        DeviceBufferId,
        EventId,
        StreamId,
    },
    host::HostEngine,
    table::HandleTable,
};

//==============================================================================
// Traits
//==============================================================================

/// Gather Engine
///
/// Asynchronous execution engine the aggregator offloads payload reordering to.
/// Submissions return as soon as the work is queued on a stream; completion is
/// observed through events.
///
/// Within a stream, work completes in submission order. An event recorded on a
/// stream completes once every piece of work submitted to that stream before it
/// has completed.
pub trait GatherEngine {
    /// Creates an execution stream.
    fn create_stream(&mut self) -> Result<StreamId, Fail>;
    /// Creates a completion event. An event that was never recorded reports done.
    fn create_event(&mut self) -> Result<EventId, Fail>;
    /// Allocates a device buffer of `len` bytes.
    fn alloc_device(&mut self, len: usize) -> Result<DeviceBufferId, Fail>;

    /// Gathers `src.len()` payloads of `stride` bytes each into `dst`, payload
    /// `i` landing at offset `i * stride`.
    ///
    /// Every address in `src` must stay readable until the work completes. The
    /// `src` list itself is only borrowed for the call; engines that read it
    /// asynchronously must take their own copy.
    fn gather(&mut self, dst: DeviceBufferId, src: &[PayloadPtr], stride: usize, stream: StreamId)
        -> Result<(), Fail>;
    /// Copies host bytes into the front of `dst`.
    fn copy_to_device(&mut self, dst: DeviceBufferId, src: &[u8], stream: StreamId) -> Result<(), Fail>;

    /// Records `event` on `stream`.
    fn record_event(&mut self, event: EventId, stream: StreamId) -> Result<(), Fail>;
    /// Non-blocking check of whether `event` has completed.
    fn query_event(&self, event: EventId) -> bool;
    /// Blocks until `event` completes.
    fn synchronize_event(&mut self, event: EventId) -> Result<(), Fail>;
    /// Blocks until all work submitted to `stream` completes.
    fn synchronize_stream(&mut self, stream: StreamId) -> Result<(), Fail>;
    /// Returns the time elapsed between two completed events.
    fn elapsed(&self, start: EventId, end: EventId) -> Result<Duration, Fail>;

    /// Returns and clears the last asynchronous fault reported by the engine.
    fn last_error(&mut self) -> Result<(), Fail>;
}
