// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use super::{
    DeviceBufferId,
    EventId,
    GatherEngine,
    HandleTable,
    StreamId,
};
use crate::runtime::{
    fail::Fail,
    network::PayloadPtr,
};
use ::crossbeam_channel::{
    self,
    Receiver,
    Sender,
};
use ::std::{
    ptr,
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Constants
//==============================================================================

const STREAM_HANDLE_BASE: usize = 100;
const EVENT_HANDLE_BASE: usize = 10_000;
const DEVICE_HANDLE_BASE: usize = 1_000_000;

//==============================================================================
// Structures
//==============================================================================

type DeviceMemory = Arc<Mutex<Vec<u8>>>;

/// Work queued on a stream worker.
enum Command {
    Gather {
        dst: DeviceMemory,
        src: Vec<PayloadPtr>,
        stride: usize,
    },
    Copy {
        dst: DeviceMemory,
        src: Vec<u8>,
    },
    Record {
        event: Arc<EventState>,
        seq: u64,
    },
    Fence(Sender<()>),
}

#[derive(Default)]
struct EventProgress {
    /// Number of times the event was recorded.
    recorded: u64,
    /// Latest recording reached by a stream worker.
    reached: u64,
    /// When the latest recording was reached.
    completed_at: Option<Instant>,
}

#[derive(Default)]
struct EventState {
    progress: Mutex<EventProgress>,
    cond: Condvar,
}

struct StreamWorker {
    tx: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

/// Host Engine
///
/// [GatherEngine] whose "device" memory is host memory and whose streams are
/// worker threads. Each stream drains its own command channel in order, which
/// gives the same ordering guarantees as a hardware stream.
pub struct HostEngine {
    streams: HandleTable<StreamWorker>,
    events: HandleTable<Arc<EventState>>,
    buffers: HandleTable<DeviceMemory>,
    /// Sticky fault raised by stream workers.
    fault: Arc<Mutex<Option<Fail>>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Host Engines
impl HostEngine {
    pub fn new() -> Self {
        Self {
            streams: HandleTable::new(STREAM_HANDLE_BASE),
            events: HandleTable::new(EVENT_HANDLE_BASE),
            buffers: HandleTable::new(DEVICE_HANDLE_BASE),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a copy of the contents of a device buffer.
    ///
    /// Work still pending on a stream may be writing to the buffer; synchronize
    /// first to observe its results.
    pub fn read_device(&self, buf: DeviceBufferId) -> Result<Vec<u8>, Fail> {
        let mem: &DeviceMemory = self.buffer(buf)?;
        let data: MutexGuard<Vec<u8>> = lock(mem);
        Ok(data.clone())
    }

    /// Returns the number of streams created so far.
    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    fn buffer(&self, buf: DeviceBufferId) -> Result<&DeviceMemory, Fail> {
        self.buffers
            .get(buf.into())
            .ok_or_else(|| Fail::new(libc::EBADF, "invalid device buffer"))
    }

    fn event(&self, event: EventId) -> Result<&Arc<EventState>, Fail> {
        self.events
            .get(event.into())
            .ok_or_else(|| Fail::new(libc::EBADF, "invalid event"))
    }

    fn submit(&self, stream: StreamId, cmd: Command) -> Result<(), Fail> {
        let worker: &StreamWorker = self
            .streams
            .get(stream.into())
            .ok_or_else(|| Fail::new(libc::EBADF, "invalid stream"))?;
        match worker.tx.as_ref() {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| Fail::new(libc::EPIPE, "stream worker is gone")),
            None => Err(Fail::new(libc::EPIPE, "stream is shut down")),
        }
    }

    /// Stream worker loop.
    fn run(rx: Receiver<Command>, fault: Arc<Mutex<Option<Fail>>>) {
        while let Ok(cmd) = rx.recv() {
            match cmd {
                Command::Gather { dst, src, stride } => {
                    let mut mem: MutexGuard<Vec<u8>> = lock(&dst);
                    if src.len() * stride > mem.len() {
                        *lock(&fault) = Some(Fail::new(libc::EFAULT, "gather overruns device buffer"));
                        continue;
                    }
                    let base: *mut u8 = mem.as_mut_ptr();
                    for (i, addr) in src.iter().enumerate() {
                        // Safety: sources were validated non-null at submission and the
                        // receive subsystem keeps them readable until this work completes.
                        unsafe { ptr::copy_nonoverlapping(addr.as_ptr(), base.add(i * stride), stride) };
                    }
                },
                Command::Copy { dst, src } => {
                    let mut mem: MutexGuard<Vec<u8>> = lock(&dst);
                    if src.len() > mem.len() {
                        *lock(&fault) = Some(Fail::new(libc::EFAULT, "copy overruns device buffer"));
                        continue;
                    }
                    mem[..src.len()].copy_from_slice(&src);
                },
                Command::Record { event, seq } => {
                    let mut progress: MutexGuard<EventProgress> = lock(&event.progress);
                    if seq > progress.reached {
                        progress.reached = seq;
                        progress.completed_at = Some(Instant::now());
                    }
                    event.cond.notify_all();
                },
                Command::Fence(done) => {
                    let _ = done.send(());
                },
            }
        }
        trace!("stream worker exiting");
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl GatherEngine for HostEngine {
    fn create_stream(&mut self) -> Result<StreamId, Fail> {
        let (tx, rx): (Sender<Command>, Receiver<Command>) = crossbeam_channel::unbounded();
        let fault: Arc<Mutex<Option<Fail>>> = self.fault.clone();
        let name: String = format!("rxgather-stream-{}", self.streams.len());
        let thread: JoinHandle<()> = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(rx, fault))?;
        let handle: usize = self.streams.insert(StreamWorker {
            tx: Some(tx),
            thread: Some(thread),
        });
        debug!("create_stream(): stream={:?}", handle);
        Ok(StreamId::from(handle))
    }

    fn create_event(&mut self) -> Result<EventId, Fail> {
        let handle: usize = self.events.insert(Arc::new(EventState::default()));
        Ok(EventId::from(handle))
    }

    fn alloc_device(&mut self, len: usize) -> Result<DeviceBufferId, Fail> {
        let mut mem: Vec<u8> = Vec::new();
        if mem.try_reserve_exact(len).is_err() {
            return Err(Fail::new(libc::ENOMEM, "cannot allocate device buffer"));
        }
        mem.resize(len, 0);
        let handle: usize = self.buffers.insert(Arc::new(Mutex::new(mem)));
        debug!("alloc_device(): buffer={:?} len={:?}", handle, len);
        Ok(DeviceBufferId::from(handle))
    }

    fn gather(&mut self, dst: DeviceBufferId, src: &[PayloadPtr], stride: usize, stream: StreamId)
        -> Result<(), Fail> {
        let mem: DeviceMemory = self.buffer(dst)?.clone();
        if src.iter().any(|addr| addr.is_null()) {
            return Err(Fail::new(libc::EFAULT, "null payload pointer"));
        }
        let cmd: Command = Command::Gather {
            dst: mem,
            src: src.to_vec(),
            stride,
        };
        self.submit(stream, cmd)
    }

    fn copy_to_device(&mut self, dst: DeviceBufferId, src: &[u8], stream: StreamId) -> Result<(), Fail> {
        let mem: DeviceMemory = self.buffer(dst)?.clone();
        let cmd: Command = Command::Copy {
            dst: mem,
            src: src.to_vec(),
        };
        self.submit(stream, cmd)
    }

    fn record_event(&mut self, event: EventId, stream: StreamId) -> Result<(), Fail> {
        let state: Arc<EventState> = self.event(event)?.clone();
        let seq: u64 = {
            let mut progress: MutexGuard<EventProgress> = lock(&state.progress);
            progress.recorded += 1;
            progress.recorded
        };
        self.submit(stream, Command::Record { event: state, seq })
    }

    fn query_event(&self, event: EventId) -> bool {
        match self.event(event) {
            Ok(state) => {
                let progress: MutexGuard<EventProgress> = lock(&state.progress);
                progress.reached >= progress.recorded
            },
            Err(_) => false,
        }
    }

    fn synchronize_event(&mut self, event: EventId) -> Result<(), Fail> {
        let state: &Arc<EventState> = self.event(event)?;
        let mut progress: MutexGuard<EventProgress> = lock(&state.progress);
        while progress.reached < progress.recorded {
            progress = match state.cond.wait(progress) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        Ok(())
    }

    fn synchronize_stream(&mut self, stream: StreamId) -> Result<(), Fail> {
        let (tx, rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        self.submit(stream, Command::Fence(tx))?;
        rx.recv().map_err(|_| Fail::new(libc::EPIPE, "stream worker is gone"))
    }

    fn elapsed(&self, start: EventId, end: EventId) -> Result<Duration, Fail> {
        let completed_at = |event: EventId| -> Result<Instant, Fail> {
            let state: &Arc<EventState> = self.event(event)?;
            let progress: MutexGuard<EventProgress> = lock(&state.progress);
            match progress.completed_at {
                Some(at) if progress.reached >= progress.recorded => Ok(at),
                _ => Err(Fail::new(libc::EAGAIN, "event not completed")),
            }
        };
        let begin: Instant = completed_at(start)?;
        let finish: Instant = completed_at(end)?;
        Ok(finish.saturating_duration_since(begin))
    }

    fn last_error(&mut self) -> Result<(), Fail> {
        match lock(&self.fault).take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for HostEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop Trait Implementation for Host Engines
impl Drop for HostEngine {
    fn drop(&mut self) {
        let mut workers: Vec<StreamWorker> = self.streams.drain().collect();
        // Close every channel first so that workers exit in parallel.
        for worker in workers.iter_mut() {
            worker.tx.take();
        }
        for worker in workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!("stream worker panicked");
                }
            }
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Locks a mutex, recovering the data if a worker panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
