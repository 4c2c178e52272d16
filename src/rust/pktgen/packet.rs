// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    network::consts::{
        DEFAULT_HEADER_SIZE,
        ETHERNET2_HEADER_SIZE,
        IPV4_HEADER_SIZE,
        UDP_HEADER_SIZE,
    },
};
use ::byteorder::{
    ByteOrder,
    NetworkEndian,
};
use ::crc::{
    Crc,
    CRC_32_ISO_HDLC,
};
use ::libc::EBADMSG;
use ::std::net::Ipv4Addr;

//==============================================================================
// Constants
//==============================================================================

//
//  Payload format:
//
//  Offset  Size    Data
//  0       8       Sequence Number
//  8       2       Payload Length
//  10      n       Filler (sequence number + offset)
//  10+n    4       CRC-32 of everything before it
//

/// Smallest payload able to carry a sequence number, a length and a CRC (in bytes).
pub const MIN_PAYLOAD_SIZE: usize = 14;

/// Sequence number stamped on packets sent to the control queue.
pub const CONTROL_SEQ: u64 = u64::MAX;

/// Destination UDP port of queue 0. Queue `q` receives on `RX_UDP_PORT_BASE + q`.
pub const RX_UDP_PORT_BASE: u16 = 9000;

const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
const SRC_IPV4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST_IPV4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const SRC_PORT: u16 = 12345;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;
const DEFAULT_TTL: u8 = 64;

const PAYLOAD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Writes a UDP/IPv4 packet carrying a stamped payload of `payload_len` bytes
/// into the front of `buf`. Returns the length of the packet.
pub fn write_packet(buf: &mut [u8], queue_id: u16, seq: u64, payload_len: usize) -> usize {
    debug_assert!(payload_len >= MIN_PAYLOAD_SIZE);
    debug_assert!(DEFAULT_HEADER_SIZE + payload_len <= u16::MAX as usize);
    let pkt_len: usize = DEFAULT_HEADER_SIZE + payload_len;
    let pkt: &mut [u8] = &mut buf[..pkt_len];

    // Ethernet II.
    pkt[0..6].copy_from_slice(&DST_MAC);
    pkt[6..12].copy_from_slice(&SRC_MAC);
    NetworkEndian::write_u16(&mut pkt[12..14], ETHERTYPE_IPV4);

    // IPv4.
    let ip: &mut [u8] = &mut pkt[ETHERNET2_HEADER_SIZE..ETHERNET2_HEADER_SIZE + IPV4_HEADER_SIZE];
    ip[0] = 0x45;
    ip[1] = 0;
    NetworkEndian::write_u16(&mut ip[2..4], (IPV4_HEADER_SIZE + UDP_HEADER_SIZE + payload_len) as u16);
    NetworkEndian::write_u16(&mut ip[4..6], seq as u16);
    // Don't fragment.
    NetworkEndian::write_u16(&mut ip[6..8], 0x4000);
    ip[8] = DEFAULT_TTL;
    ip[9] = IPPROTO_UDP;
    NetworkEndian::write_u16(&mut ip[10..12], 0);
    ip[12..16].copy_from_slice(&SRC_IPV4.octets());
    ip[16..20].copy_from_slice(&DST_IPV4.octets());
    let checksum: u16 = ipv4_checksum(ip);
    NetworkEndian::write_u16(&mut ip[10..12], checksum);

    // UDP. The checksum is optional over IPv4 and left out.
    let udp: &mut [u8] = &mut pkt[ETHERNET2_HEADER_SIZE + IPV4_HEADER_SIZE..DEFAULT_HEADER_SIZE];
    NetworkEndian::write_u16(&mut udp[0..2], SRC_PORT);
    NetworkEndian::write_u16(&mut udp[2..4], RX_UDP_PORT_BASE.wrapping_add(queue_id));
    NetworkEndian::write_u16(&mut udp[4..6], (UDP_HEADER_SIZE + payload_len) as u16);
    NetworkEndian::write_u16(&mut udp[6..8], 0);

    stamp_payload(&mut pkt[DEFAULT_HEADER_SIZE..], seq);
    pkt_len
}

/// Fills `payload` with a sequence number, its own length, filler and a CRC.
pub fn stamp_payload(payload: &mut [u8], seq: u64) {
    let len: usize = payload.len();
    NetworkEndian::write_u64(&mut payload[0..8], seq);
    NetworkEndian::write_u16(&mut payload[8..10], len as u16);
    for (i, byte) in payload[10..len - 4].iter_mut().enumerate() {
        *byte = (seq as u8).wrapping_add(i as u8);
    }
    let crc: u32 = PAYLOAD_CRC.checksum(&payload[..len - 4]);
    NetworkEndian::write_u32(&mut payload[len - 4..], crc);
}

/// Checks a stamped payload found at the front of `buf` and returns its
/// sequence number. Bytes past the payload length are ignored.
pub fn verify_payload(buf: &[u8]) -> Result<u64, Fail> {
    if buf.len() < MIN_PAYLOAD_SIZE {
        return Err(Fail::new(EBADMSG, "payload too small"));
    }
    let len: usize = NetworkEndian::read_u16(&buf[8..10]) as usize;
    if len < MIN_PAYLOAD_SIZE || len > buf.len() {
        return Err(Fail::new(EBADMSG, "bad payload length"));
    }
    let expected: u32 = NetworkEndian::read_u32(&buf[len - 4..len]);
    if PAYLOAD_CRC.checksum(&buf[..len - 4]) != expected {
        return Err(Fail::new(EBADMSG, "payload checksum mismatch"));
    }
    Ok(NetworkEndian::read_u64(&buf[0..8]))
}

/// Computes the ones' complement checksum of an IPv4 header.
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut state: u32 = 0;
    for chunk in header.chunks_exact(2) {
        state += NetworkEndian::read_u16(chunk) as u32;
    }
    while state > 0xffff {
        state = (state & 0xffff) + (state >> 16);
    }
    !(state as u16)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        ipv4_checksum,
        verify_payload,
        write_packet,
        RX_UDP_PORT_BASE,
    };
    use crate::runtime::network::consts::{
        DEFAULT_HEADER_SIZE,
        ETHERNET2_HEADER_SIZE,
        IPV4_HEADER_SIZE,
    };
    use ::byteorder::{
        ByteOrder,
        NetworkEndian,
    };

    #[test]
    fn packet_headers_are_well_formed() {
        let mut buf: Vec<u8> = vec![0; 128];
        let len: usize = write_packet(&mut buf, 3, 7, 20);
        assert_eq!(len, DEFAULT_HEADER_SIZE + 20);
        assert_eq!(NetworkEndian::read_u16(&buf[12..14]), 0x0800);

        let ip: &[u8] = &buf[ETHERNET2_HEADER_SIZE..ETHERNET2_HEADER_SIZE + IPV4_HEADER_SIZE];
        assert_eq!(NetworkEndian::read_u16(&ip[2..4]) as usize, len - ETHERNET2_HEADER_SIZE);
        // A header carrying its own checksum sums to zero.
        assert_eq!(ipv4_checksum(ip), 0);

        let udp: &[u8] = &buf[ETHERNET2_HEADER_SIZE + IPV4_HEADER_SIZE..DEFAULT_HEADER_SIZE];
        assert_eq!(NetworkEndian::read_u16(&udp[2..4]), RX_UDP_PORT_BASE + 3);
        assert_eq!(NetworkEndian::read_u16(&udp[4..6]), 28);
    }

    #[test]
    fn payload_verifies_with_trailing_bytes() {
        let mut buf: Vec<u8> = vec![0xaa; 128];
        write_packet(&mut buf, 1, 42, 30);
        assert_eq!(verify_payload(&buf[DEFAULT_HEADER_SIZE..]).unwrap(), 42);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let mut buf: Vec<u8> = vec![0; 128];
        write_packet(&mut buf, 1, 42, 30);
        buf[DEFAULT_HEADER_SIZE + 12] ^= 0xff;
        assert_eq!(verify_payload(&buf[DEFAULT_HEADER_SIZE..]).unwrap_err().errno, libc::EBADMSG);
        assert!(verify_payload(&[0; 4]).is_err());
    }
}
