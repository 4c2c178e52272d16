// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#[macro_use]
extern crate log;

pub mod aggregator;
pub mod pktgen;
pub mod runtime;
pub mod rxlog;

#[cfg(test)]
mod test_helpers;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    aggregator::{
        LaunchTiming,
        OverflowPolicy,
        RxAggregator,
        RxConfig,
        RxStats,
        StagingMode,
        StepOutcome,
    },
    pktgen::SyntheticSource,
    runtime::{
        fail::Fail,
        gpu::{
            GatherEngine,
            HostEngine,
        },
        network::{
            Burst,
            BurstMemory,
            BurstSource,
        },
    },
    rxlog::LaunchLog,
};
