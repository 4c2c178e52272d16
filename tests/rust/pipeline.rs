// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::rxgather::{
    pktgen::{
        verify_payload,
        SourceConfig,
        SyntheticBurst,
    },
    runtime::{
        gpu::DeviceBufferId,
        network::consts::DEFAULT_HEADER_SIZE,
    },
    Burst,
    BurstSource,
    HostEngine,
    LaunchLog,
    LaunchTiming,
    RxAggregator,
    RxConfig,
    RxStats,
    StagingMode,
    StepOutcome,
    SyntheticSource,
};

//==============================================================================
// Constants
//==============================================================================

const BATCH_SIZE: usize = 16;
const NUM_CONCURRENT: usize = 4;
const PACKET_SIZE: usize = 256;
const STRIDE: usize = PACKET_SIZE - DEFAULT_HEADER_SIZE;

//==============================================================================
// Helper Functions
//==============================================================================

fn rx_config() -> RxConfig {
    RxConfig {
        batch_size: BATCH_SIZE,
        max_packet_size: PACKET_SIZE,
        header_size: DEFAULT_HEADER_SIZE,
        num_concurrent: NUM_CONCURRENT,
        ..Default::default()
    }
}

fn source_config(num_packets: u64) -> SourceConfig {
    SourceConfig {
        num_packets: Some(num_packets),
        burst_size: 8,
        packet_size: PACKET_SIZE,
        payload_jitter: 40,
        num_queues: 2,
        control_interval: Some(5),
        ring_size: 512,
        header_data_split: false,
        seed: 11,
    }
}

/// Feeds every burst of `source` to `rx`. Returns the number of data bytes fed.
fn run(rx: &mut RxAggregator<HostEngine>, source: &mut SyntheticSource) -> u64 {
    let mut data_bytes: u64 = 0;
    while let Some(burst) = source.receive() {
        match rx.step(Some(&burst)).unwrap() {
            StepOutcome::Aggregated { .. } => data_bytes += burst.total_bytes(),
            StepOutcome::Ignored => assert_eq!(burst.queue_id(), 0),
            StepOutcome::NoInput => unreachable!(),
        }
    }
    data_bytes
}

/// Checks that every slot holds one batch of consecutive payloads.
fn check_slots(rx: &RxAggregator<HostEngine>) {
    for slot in 0..NUM_CONCURRENT {
        let buf: DeviceBufferId = rx.device_buffer(slot).unwrap();
        let data: Vec<u8> = rx.engine().read_device(buf).unwrap();
        assert_eq!(data.len(), BATCH_SIZE * STRIDE);
        for (i, payload) in data.chunks_exact(STRIDE).enumerate() {
            let expected: u64 = (slot * BATCH_SIZE + i) as u64;
            assert_eq!(verify_payload(payload).unwrap(), expected);
        }
    }
}

//==============================================================================
// Integration Tests
//==============================================================================

#[test]
fn gathers_payloads_in_arrival_order() {
    let num_packets: u64 = (BATCH_SIZE * NUM_CONCURRENT) as u64;
    let mut rx: RxAggregator<HostEngine> = RxAggregator::new(rx_config(), HostEngine::new()).unwrap();
    let mut source: SyntheticSource = SyntheticSource::new(source_config(num_packets)).unwrap();

    let data_bytes: u64 = run(&mut rx, &mut source);
    assert_eq!(rx.aggregated(), 0);
    rx.wait_idle().unwrap();
    assert_eq!(rx.in_flight(), 0);
    check_slots(&rx);

    let control_bursts: u64 = source.stats().control_bursts;
    let stats: RxStats = rx.shutdown(&mut source);
    assert!(source.is_shut_down());
    assert_eq!(stats.total_packets_received, num_packets);
    assert_eq!(stats.total_bytes_received, data_bytes);
    assert_eq!(stats.control_bursts_ignored, control_bursts);
    assert_eq!(stats.batches_launched, NUM_CONCURRENT as u64);
    assert_eq!(stats.batches_completed, NUM_CONCURRENT as u64);
}

#[test]
fn host_copy_with_header_data_split() {
    let num_packets: u64 = (BATCH_SIZE * NUM_CONCURRENT) as u64;
    let mut config: RxConfig = rx_config();
    config.staging = StagingMode::HostCopy;
    config.header_data_split = true;
    let mut source_config: SourceConfig = source_config(num_packets);
    source_config.header_data_split = true;

    let mut rx: RxAggregator<HostEngine> = RxAggregator::new(config, HostEngine::new()).unwrap();
    let mut source: SyntheticSource = SyntheticSource::new(source_config).unwrap();

    run(&mut rx, &mut source);
    rx.wait_idle().unwrap();
    check_slots(&rx);
    assert_eq!(rx.stats().batches_completed, NUM_CONCURRENT as u64);
}

#[test]
fn bursts_stay_readable_after_source_drop() {
    for staging in [StagingMode::Gather, StagingMode::HostCopy] {
        let mut config: RxConfig = rx_config();
        config.batch_size = 1;
        config.staging = staging;
        let mut source_config: SourceConfig = source_config(1);
        source_config.control_interval = None;
        source_config.ring_size = 8;
        source_config.validate_for(&config).unwrap();

        let mut rx: RxAggregator<HostEngine> = RxAggregator::new(config, HostEngine::new()).unwrap();
        let mut source: SyntheticSource = SyntheticSource::new(source_config).unwrap();
        let burst: SyntheticBurst = source.receive().unwrap();
        drop(source);
        let filler: Vec<u8> = vec![0xaa; 8 * PACKET_SIZE];

        rx.step(Some(&burst)).unwrap();
        // Gathers may still be reading once the burst is gone.
        drop(burst);
        let late_filler: Vec<u8> = vec![0xaa; 8 * PACKET_SIZE];
        rx.wait_idle().unwrap();

        let buf: DeviceBufferId = rx.device_buffer(0).unwrap();
        let data: Vec<u8> = rx.engine().read_device(buf).unwrap();
        assert_eq!(verify_payload(&data).unwrap(), 0, "{:?}", staging);
        assert!(filler.iter().chain(late_filler.iter()).all(|b| *b == 0xaa));
    }
}

#[test]
fn launch_log_times_every_batch() {
    let num_batches: usize = 10;
    let mut rx: RxAggregator<HostEngine> = RxAggregator::new(rx_config(), HostEngine::new()).unwrap();
    let mut source: SyntheticSource = SyntheticSource::new(source_config((BATCH_SIZE * num_batches) as u64)).unwrap();
    let log: LaunchLog = LaunchLog::new();
    rx.set_launch_observer(log.observer());

    run(&mut rx, &mut source);

    let timings: Vec<LaunchTiming> = log.timings();
    assert_eq!(timings.len(), num_batches);
    for (i, timing) in timings.iter().enumerate() {
        assert_eq!(timing.batch_index, i as u64);
        assert_eq!(timing.slot, i % NUM_CONCURRENT);
        assert_eq!(timing.packets, BATCH_SIZE);
        assert_eq!(timing.bytes, BATCH_SIZE * STRIDE);
    }
    // Timed launches are complete by the time they are reported.
    rx.reclaim();
    assert_eq!(rx.in_flight(), 0);

    let mut csv: Vec<u8> = Vec::new();
    log.write(&mut csv).unwrap();
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), num_batches + 1);
}
