// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Constants
//==============================================================================

/// Receive queue that carries non-payload traffic. Bursts on it are ignored.
pub const CONTROL_QUEUE_ID: u16 = 0;

/// Size of an Ethernet II header (in bytes).
pub const ETHERNET2_HEADER_SIZE: usize = 14;

/// Size of an IPv4 header without options (in bytes).
pub const IPV4_HEADER_SIZE: usize = 20;

/// Size of a UDP header (in bytes).
pub const UDP_HEADER_SIZE: usize = 8;

/// Size of the L4-and-below headers preceding every payload (in bytes).
pub const DEFAULT_HEADER_SIZE: usize = ETHERNET2_HEADER_SIZE + IPV4_HEADER_SIZE + UDP_HEADER_SIZE;

/// Largest packet the sender is expected to emit (in bytes).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 9100;

/// Maximum number of packets in a single burst.
pub const MAX_BURST_SIZE: usize = 256;
