// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    value_parser,
    Arg,
    ArgMatches,
    Command,
};
use ::colored::Colorize;
use ::rxgather::{
    pktgen::{
        SourceConfig,
        SyntheticBurst,
    },
    runtime::logging,
    BurstSource,
    Fail,
    HostEngine,
    LaunchLog,
    OverflowPolicy,
    RxAggregator,
    RxConfig,
    RxStats,
    StagingMode,
    StepOutcome,
    SyntheticSource,
};
use ::std::{
    fs::File,
    io,
    process,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

const DEFAULT_NUM_PACKETS: u64 = 1_000_000;

//======================================================================================================================
// cli()
//======================================================================================================================

fn cli() -> Command<'static> {
    Command::new("rx-bench")
        .about("Feeds synthetic bursts through the receive batch aggregator")
        .arg(
            Arg::new("packets")
                .short('n')
                .long("packets")
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .help("Number of data packets to generate"),
        )
        .arg(
            Arg::new("burst-size")
                .short('b')
                .long("burst-size")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .help("Largest number of packets in a burst"),
        )
        .arg(
            Arg::new("queues")
                .short('q')
                .long("queues")
                .takes_value(true)
                .value_parser(value_parser!(u16))
                .help("Number of data queues"),
        )
        .arg(
            Arg::new("control-interval")
                .long("control-interval")
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .help("Send a control-queue burst every this many bursts"),
        )
        .arg(
            Arg::new("jitter")
                .long("jitter")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .help("Shorten payloads by up to this many bytes"),
        )
        .arg(
            Arg::new("staging")
                .long("staging")
                .takes_value(true)
                .possible_values(["gather", "host-copy"])
                .help("How packets are staged into batch slots"),
        )
        .arg(
            Arg::new("overflow")
                .long("overflow")
                .takes_value(true)
                .possible_values(["fail", "drop-batch", "abort"])
                .help("What to do when every batch slot is in flight"),
        )
        .arg(
            Arg::new("split")
                .long("split")
                .help("Deliver payloads in a separate segment"),
        )
        .arg(
            Arg::new("timed")
                .long("timed")
                .takes_value(true)
                .value_name("CSV")
                .help("Time every launch and dump the timings to a file ('-' for stdout)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .takes_value(true)
                .value_parser(value_parser!(u64))
                .help("Seed of the packet generator"),
        )
}

//======================================================================================================================
// bench()
//======================================================================================================================

fn bench(matches: &ArgMatches) -> Result<()> {
    let mut config: RxConfig = RxConfig::from_env()?;
    if let Some(staging) = matches.get_one::<String>("staging") {
        config.staging = staging.parse::<StagingMode>()?;
    }
    if let Some(policy) = matches.get_one::<String>("overflow") {
        config.overflow_policy = policy.parse::<OverflowPolicy>()?;
    }
    config.header_data_split = matches.is_present("split");

    let burst_size: usize = matches.get_one::<usize>("burst-size").copied().unwrap_or(32);
    let source_config: SourceConfig = SourceConfig {
        num_packets: Some(matches.get_one::<u64>("packets").copied().unwrap_or(DEFAULT_NUM_PACKETS)),
        burst_size,
        // Gathers read a full stride from each payload, so ring buffers must be that large.
        packet_size: config.max_packet_size,
        payload_jitter: matches.get_one::<usize>("jitter").copied().unwrap_or(0),
        num_queues: matches.get_one::<u16>("queues").copied().unwrap_or(4),
        control_interval: matches.get_one::<u64>("control-interval").copied(),
        ring_size: (config.num_concurrent + 1) * config.batch_size + 2 * burst_size,
        header_data_split: config.header_data_split,
        seed: matches.get_one::<u64>("seed").copied().unwrap_or(0),
    };
    source_config.validate_for(&config)?;

    let running: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
    let flag: Arc<AtomicBool> = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("Received Ctrl-C signal.");
        flag.store(false, Ordering::SeqCst);
    })?;

    let mut source: SyntheticSource = SyntheticSource::new(source_config)?;
    let mut rx: RxAggregator<HostEngine> = RxAggregator::new(config, HostEngine::new())?;
    let log: Option<LaunchLog> = match matches.get_one::<String>("timed") {
        Some(_) => {
            let log: LaunchLog = LaunchLog::new();
            rx.set_launch_observer(log.observer());
            Some(log)
        },
        None => None,
    };

    let mut congested: u64 = 0;
    let start: Instant = Instant::now();
    while running.load(Ordering::SeqCst) {
        let burst: SyntheticBurst = match source.receive() {
            Some(burst) => burst,
            None => break,
        };
        match rx.step(Some(&burst)) {
            Ok(StepOutcome::NoInput) => break,
            Ok(_) => (),
            Err(e) if e.is_congestion() => congested += 1,
            Err(e) => {
                eprintln!("{}", format!("rx-bench: {}", e).red());
                process::exit(1);
            },
        }
    }
    if let Err(e) = rx.wait_idle() {
        eprintln!("{}", format!("rx-bench: {}", e).red());
        process::exit(1);
    }
    let elapsed: Duration = start.elapsed();

    let stats: RxStats = rx.shutdown(&mut source);
    print_summary(&stats, congested, elapsed);

    if let (Some(log), Some(path)) = (log, matches.get_one::<String>("timed")) {
        match path.as_str() {
            "-" => log.write(&mut io::stdout().lock())?,
            path => log.write(&mut File::create(path)?)?,
        }
    }
    Ok(())
}

/// Prints final counters.
fn print_summary(stats: &RxStats, congested: u64, elapsed: Duration) {
    let secs: f64 = elapsed.as_secs_f64().max(f64::EPSILON);
    let gbps: f64 = (stats.total_bytes_received as f64 * 8.0) / secs / 1e9;
    println!("{}", "rx-bench summary".bold());
    println!("  {}", stats);
    println!("  control bursts ignored: {}", stats.control_bursts_ignored);
    if stats.packets_dropped > 0 {
        println!("  {}", format!("{} packets dropped", stats.packets_dropped).yellow());
    }
    println!("  elapsed: {:?} ({:.2} Gbit/s)", elapsed, gbps);
    match congested {
        0 => println!("  {}", "no congestion".green()),
        n => println!("  {}", format!("{} steps hit a full in-flight queue", n).yellow()),
    }
}

//======================================================================================================================
// main()
//======================================================================================================================

pub fn main() -> Result<()> {
    logging::initialize();
    let matches: ArgMatches = cli().get_matches();
    match bench(&matches) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<Fail>() {
            Some(fail) => {
                eprintln!("{}", format!("rx-bench: {}", fail).red());
                process::exit(1);
            },
            None => Err(e),
        },
    }
}
