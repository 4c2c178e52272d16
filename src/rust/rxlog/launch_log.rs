// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::aggregator::LaunchTiming;
use ::chrono::NaiveTime;
use ::std::{
    cell::RefCell,
    io,
    rc::Rc,
};

//==============================================================================
// Constants
//==============================================================================

const DEFAULT_CAPACITY: usize = 1024;

//==============================================================================
// Structures
//==============================================================================

/// Launch Log
///
/// Collects per-launch timings reported to a launch observer. Clones share the
/// same log, so one clone can be handed to the aggregator and another kept to
/// dump the data.
#[derive(Clone)]
pub struct LaunchLog {
    data: Rc<RefCell<Vec<(NaiveTime, LaunchTiming)>>>,
}

//==============================================================================
// Implementations
//==============================================================================

impl LaunchLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(Vec::with_capacity(capacity))),
        }
    }

    /// Records one launch.
    pub fn push(&self, timing: &LaunchTiming) {
        let mut data = self.data.borrow_mut();
        if data.len() == data.capacity() {
            warn!("launch log allocation");
        }
        data.push((chrono::Local::now().time(), *timing));
    }

    /// Returns an observer feeding the target [LaunchLog].
    pub fn observer(&self) -> impl FnMut(&LaunchTiming) + 'static {
        let log: LaunchLog = self.clone();
        move |timing: &LaunchTiming| log.push(timing)
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }

    /// Returns a copy of the recorded timings, oldest first.
    pub fn timings(&self) -> Vec<LaunchTiming> {
        self.data.borrow().iter().map(|(_, timing)| *timing).collect()
    }

    /// Writes the log as CSV.
    pub fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "time,batch,slot,packets,bytes,elapsed_ns")?;
        for (time, timing) in self.data.borrow().iter() {
            writeln!(
                w,
                "{},{},{},{},{},{}",
                time,
                timing.batch_index,
                timing.slot,
                timing.packets,
                timing.bytes,
                timing.elapsed.as_nanos()
            )?;
        }
        Ok(())
    }
}

impl Default for LaunchLog {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::LaunchLog;
    use crate::aggregator::LaunchTiming;
    use ::std::time::Duration;

    #[test]
    fn observer_feeds_shared_log() {
        let log: LaunchLog = LaunchLog::with_capacity(1);
        let mut observer = log.observer();
        let timing: LaunchTiming = LaunchTiming {
            batch_index: 3,
            slot: 1,
            packets: 8,
            bytes: 64,
            elapsed: Duration::from_micros(5),
        };
        observer(&timing);
        observer(&timing);
        assert_eq!(log.len(), 2);
        assert_eq!(log.timings()[0], timing);

        let mut out: Vec<u8> = Vec::new();
        log.write(&mut out).unwrap();
        let text: String = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(1).unwrap().ends_with(",3,1,8,64,5000"));
    }
}
