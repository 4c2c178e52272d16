// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    network::consts::{
        CONTROL_QUEUE_ID,
        DEFAULT_HEADER_SIZE,
        DEFAULT_MAX_PACKET_SIZE,
    },
};
use ::std::{
    env,
    fs,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//==============================================================================
// Constants
//==============================================================================

/// Default number of packets per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of batches that may be in flight at once.
pub const DEFAULT_NUM_CONCURRENT: usize = 4;

/// Top-level key of the aggregator section in a configuration file.
const CONFIG_SECTION: &str = "rx";

//==============================================================================
// Enumerations
//==============================================================================

/// How packets are staged into a batch slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingMode {
    /// Stage payload pointers and gather them on the engine.
    Gather,
    /// Copy payload bytes into a host staging buffer and copy the buffer over.
    HostCopy,
}

/// What to do when a batch is ready but every slot is still in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Return a congestion failure to the caller.
    Fail,
    /// Discard the packets staged in the current slot and keep going.
    DropBatch,
    /// Abort the process.
    Abort,
}

//==============================================================================
// Structures
//==============================================================================

/// Aggregator Configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxConfig {
    /// Number of packets gathered per batch.
    pub batch_size: usize,
    /// Largest packet expected from the sender, headers included.
    pub max_packet_size: usize,
    /// Size of the headers preceding each payload.
    pub header_size: usize,
    /// Number of batch slots, which bounds the number of in-flight batches.
    pub num_concurrent: usize,
    /// Bursts arriving on this queue are ignored.
    pub control_queue_id: u16,
    pub staging: StagingMode,
    /// Payloads arrive in a separate segment from their headers.
    pub header_data_split: bool,
    pub overflow_policy: OverflowPolicy,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Aggregator Configuration
impl RxConfig {
    /// Parses the `rx` section of a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, Fail> {
        let docs: Vec<Yaml> = match YamlLoader::load_from_str(text) {
            Ok(docs) => docs,
            Err(e) => return Err(Fail::new(libc::EINVAL, &format!("malformed configuration: {}", e))),
        };
        let mut config: Self = Self::default();
        let section: &Yaml = match docs.first() {
            Some(doc) => &doc[CONFIG_SECTION],
            None => return Ok(config),
        };
        if section.is_badvalue() || section.is_null() {
            return Ok(config);
        }

        if let Some(val) = read_usize(section, "batch_size")? {
            config.batch_size = val;
        }
        if let Some(val) = read_usize(section, "max_packet_size")? {
            config.max_packet_size = val;
        }
        if let Some(val) = read_usize(section, "header_size")? {
            config.header_size = val;
        }
        if let Some(val) = read_usize(section, "num_concurrent")? {
            config.num_concurrent = val;
        }
        if let Some(val) = read_usize(section, "control_queue_id")? {
            config.control_queue_id = match u16::try_from(val) {
                Ok(id) => id,
                Err(_) => return Err(Fail::new(libc::ERANGE, "control_queue_id out of range")),
            };
        }
        if let Some(val) = read_str(section, "staging")? {
            config.staging = val.parse()?;
        }
        match &section["header_data_split"] {
            Yaml::Boolean(val) => config.header_data_split = *val,
            Yaml::BadValue => (),
            _ => return Err(Fail::new(libc::EINVAL, "header_data_split must be a boolean")),
        }
        if let Some(val) = read_str(section, "overflow_policy")? {
            config.overflow_policy = val.parse()?;
        }

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, Fail> {
        let text: String = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Loads configuration from the file named by `CONFIG_PATH`, or the
    /// defaults if it is unset, then applies environment overrides.
    pub fn from_env() -> Result<Self, Fail> {
        let config: Self = match env::var("CONFIG_PATH") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Overrides numeric parameters with `RX_*` environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        let read = |name: &str| -> Option<usize> { env::var(name).ok().and_then(|val| val.parse().ok()) };
        if let Some(val) = read("RX_BATCH_SIZE") {
            self.batch_size = val;
        }
        if let Some(val) = read("RX_MAX_PACKET_SIZE") {
            self.max_packet_size = val;
        }
        if let Some(val) = read("RX_HEADER_SIZE") {
            self.header_size = val;
        }
        if let Some(val) = read("RX_NUM_CONCURRENT") {
            self.num_concurrent = val;
        }
        self
    }

    /// Checks that the target configuration describes a usable pipeline.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.batch_size == 0 {
            return Err(Fail::new(libc::EINVAL, "batch_size must be positive"));
        }
        if self.num_concurrent == 0 {
            return Err(Fail::new(libc::EINVAL, "num_concurrent must be positive"));
        }
        if self.header_size >= self.max_packet_size {
            return Err(Fail::new(libc::EINVAL, "header_size must be smaller than max_packet_size"));
        }
        if self.batch_size.checked_mul(self.nominal_payload_size()).is_none() {
            return Err(Fail::new(libc::EOVERFLOW, "batch does not fit in memory"));
        }
        Ok(())
    }

    /// Payload size every packet is assumed to carry.
    pub fn nominal_payload_size(&self) -> usize {
        self.max_packet_size.saturating_sub(self.header_size)
    }

    /// Size of the contiguous output of one batch (in bytes).
    pub fn batch_bytes(&self) -> usize {
        self.batch_size * self.nominal_payload_size()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
            num_concurrent: DEFAULT_NUM_CONCURRENT,
            control_queue_id: CONTROL_QUEUE_ID,
            staging: StagingMode::Gather,
            header_data_split: false,
            overflow_policy: OverflowPolicy::Fail,
        }
    }
}

impl FromStr for StagingMode {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gather" => Ok(StagingMode::Gather),
            "host-copy" => Ok(StagingMode::HostCopy),
            _ => Err(Fail::new(libc::EINVAL, &format!("unknown staging mode {:?}", s))),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(OverflowPolicy::Fail),
            "drop-batch" => Ok(OverflowPolicy::DropBatch),
            "abort" => Ok(OverflowPolicy::Abort),
            _ => Err(Fail::new(libc::EINVAL, &format!("unknown overflow policy {:?}", s))),
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

fn read_usize(section: &Yaml, key: &str) -> Result<Option<usize>, Fail> {
    match &section[key] {
        Yaml::BadValue => Ok(None),
        Yaml::Integer(val) => match usize::try_from(*val) {
            Ok(val) => Ok(Some(val)),
            Err(_) => Err(Fail::new(libc::ERANGE, &format!("{} must not be negative", key))),
        },
        _ => Err(Fail::new(libc::EINVAL, &format!("{} must be an integer", key))),
    }
}

fn read_str<'a>(section: &'a Yaml, key: &str) -> Result<Option<&'a str>, Fail> {
    match &section[key] {
        Yaml::BadValue => Ok(None),
        Yaml::String(val) => Ok(Some(val.as_str())),
        _ => Err(Fail::new(libc::EINVAL, &format!("{} must be a string", key))),
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
