//! ICMP / ICMPv6 echo packets (RFC 792, RFC 4443).
//!
//! Both families share the 8-byte echo header:
//!
//! ```text
//!  0        8        16                31
//! +--------+--------+-----------------+
//! |  type  |  code  |    checksum     |
//! +--------+--------+-----------------+
//! |   identifier    |    sequence     |
//! +-----------------+-----------------+
//! |  payload ...
//! ```
//!
//! IPv4 packets carry the Internet checksum, computed here and verified on
//! receive. The ICMPv6 checksum covers a pseudo-header the kernel owns, so it
//! is sent as zero and left to the stack to fill in and validate.

use crate::resolver::AddressFamily;

pub const ICMP_HEADER_LEN: usize = 8;
pub const DEFAULT_PAYLOAD_LEN: usize = 56;

/// Largest payload an IPv4 echo can carry (65535 - 20 byte IP header - 8).
pub const MAX_PAYLOAD_LEN: usize = 65507;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPPROTO_ICMP: u8 = 1;

const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Echo message kind; the wire type byte depends on the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

impl EchoKind {
    pub fn type_for(self, family: AddressFamily) -> u8 {
        match (self, family) {
            (EchoKind::Request, AddressFamily::V4) => ICMPV4_ECHO_REQUEST,
            (EchoKind::Reply, AddressFamily::V4) => ICMPV4_ECHO_REPLY,
            (EchoKind::Request, AddressFamily::V6) => ICMPV6_ECHO_REQUEST,
            (EchoKind::Reply, AddressFamily::V6) => ICMPV6_ECHO_REPLY,
        }
    }
}

/// An echo reply that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
    /// Length of the ICMP message, IP header excluded.
    pub size: usize,
}

/// Why a datagram was not accepted as one of our echo replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    TooShort,
    BadIpHeader,
    NotIcmp(u8),
    NotEchoReply { icmp_type: u8, code: u8 },
    BadChecksum,
    ForeignIdentifier(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Reply(EchoReply),
    Unexpected(Anomaly),
}

/// Internet checksum: one's complement of the one's complement sum of the
/// data taken as big-endian 16-bit words, odd trailing byte zero-padded.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u64;
    }
    if let [last] = words.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u64;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Filler used when the caller sends no payload of its own.
pub fn default_payload() -> Vec<u8> {
    sized_payload(DEFAULT_PAYLOAD_LEN)
}

/// A payload of `len` bytes cycling through printable ASCII.
pub fn sized_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b' ' + (i % 95) as u8).collect()
}

pub fn build_echo_request(
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    build_echo(EchoKind::Request, family, identifier, sequence, payload)
}

/// Builds the reply a peer would send back for a request.
pub fn build_echo_reply(
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    build_echo(EchoKind::Reply, family, identifier, sequence, payload)
}

fn build_echo(
    kind: EchoKind,
    family: AddressFamily,
    identifier: u16,
    sequence: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
    packet.push(kind.type_for(family));
    packet.push(0);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);

    if family == AddressFamily::V4 {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Classifies a received datagram for a session expecting `family` replies
/// carrying `identifier`. Never fails: anything that is not one of our echo
/// replies comes back as `Incoming::Unexpected`.
pub fn parse_incoming(datagram: &[u8], family: AddressFamily, identifier: u16) -> Incoming {
    let icmp = match family {
        AddressFamily::V4 => match strip_ipv4_header(datagram) {
            Ok(icmp) => icmp,
            Err(anomaly) => return Incoming::Unexpected(anomaly),
        },
        AddressFamily::V6 => datagram,
    };

    if icmp.len() < ICMP_HEADER_LEN {
        return Incoming::Unexpected(Anomaly::TooShort);
    }

    let (icmp_type, code) = (icmp[0], icmp[1]);
    if icmp_type != EchoKind::Reply.type_for(family) || code != 0 {
        return Incoming::Unexpected(Anomaly::NotEchoReply { icmp_type, code });
    }

    if family == AddressFamily::V4 && checksum(icmp) != 0 {
        return Incoming::Unexpected(Anomaly::BadChecksum);
    }

    let reply_identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    if reply_identifier != identifier {
        return Incoming::Unexpected(Anomaly::ForeignIdentifier(reply_identifier));
    }

    Incoming::Reply(EchoReply {
        identifier: reply_identifier,
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        size: icmp.len(),
    })
}

/// Drops a leading IPv4 header if one is present. Raw sockets (and datagram
/// sockets on BSDs) deliver it; Linux datagram sockets do not. A bare ICMP
/// echo reply starts with type 0, so a version nibble of 4 marks a header.
fn strip_ipv4_header(datagram: &[u8]) -> Result<&[u8], Anomaly> {
    let Some(&first) = datagram.first() else {
        return Err(Anomaly::TooShort);
    };
    if first >> 4 != 4 {
        return Ok(datagram);
    }

    let header_len = ((first & 0x0f) as usize) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || datagram.len() < header_len {
        return Err(Anomaly::BadIpHeader);
    }
    let protocol = datagram[9];
    if protocol != IPPROTO_ICMP {
        return Err(Anomaly::NotIcmp(protocol));
    }
    Ok(&datagram[header_len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal IPv4 header (no options) carrying `icmp`.
    fn with_ipv4_header(icmp: &[u8]) -> Vec<u8> {
        let total = (IPV4_MIN_HEADER_LEN + icmp.len()) as u16;
        let mut datagram = vec![0x45, 0];
        datagram.extend_from_slice(&total.to_be_bytes());
        datagram.extend_from_slice(&[0, 0, 0, 0, 64, IPPROTO_ICMP, 0, 0]);
        datagram.extend_from_slice(&[127, 0, 0, 1, 127, 0, 0, 1]);
        datagram.extend_from_slice(icmp);
        datagram
    }

    #[test]
    fn checksum_reference_vector() {
        // RFC 1071 section 3 example words
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2u16);
    }

    #[test]
    fn checksum_pads_odd_length() {
        assert_eq!(checksum(&[0xab]), !0xab00u16);
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn checksum_of_oversized_input() {
        let packet = build_echo_request(AddressFamily::V4, 1, 1, &vec![0xff; 200_000]);
        assert_eq!(checksum(&packet), 0);

        let reply = build_echo_reply(AddressFamily::V4, 1, 1, &vec![0xab; 300_001]);
        assert!(matches!(
            parse_incoming(&reply, AddressFamily::V4, 1),
            Incoming::Reply(EchoReply { sequence: 1, .. })
        ));
    }

    #[test]
    fn request_header_layout_v4() {
        let packet = build_echo_request(AddressFamily::V4, 0x1234, 0xabcd, b"hi");
        assert_eq!(packet.len(), ICMP_HEADER_LEN + 2);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..8], &[0x12, 0x34, 0xab, 0xcd]);
        assert_eq!(&packet[8..], b"hi");
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn request_header_layout_v6() {
        let packet = build_echo_request(AddressFamily::V6, 7, 9, &[]);
        assert_eq!(packet, vec![128, 0, 0, 0, 0, 7, 0, 9]);
    }

    #[test]
    fn default_payload_is_fixed_length() {
        let payload = default_payload();
        assert_eq!(payload.len(), DEFAULT_PAYLOAD_LEN);
        assert_eq!(payload, default_payload());
        assert!(payload.iter().all(|b| b.is_ascii_graphic() || *b == b' '));
    }

    #[test]
    fn reply_recovers_identifier_and_sequence() {
        for (identifier, sequence, payload) in [
            (0u16, 0u16, Vec::new()),
            (0xffff, 0xffff, default_payload()),
            (0x0102, 0x0304, b"odd".to_vec()),
        ] {
            for family in [AddressFamily::V4, AddressFamily::V6] {
                let reply = build_echo_reply(family, identifier, sequence, &payload);
                assert_eq!(
                    parse_incoming(&reply, family, identifier),
                    Incoming::Reply(EchoReply {
                        identifier,
                        sequence,
                        size: ICMP_HEADER_LEN + payload.len(),
                    })
                );
            }
        }
    }

    #[test]
    fn ipv4_header_is_stripped() {
        let reply = build_echo_reply(AddressFamily::V4, 42, 3, &default_payload());
        let datagram = with_ipv4_header(&reply);
        match parse_incoming(&datagram, AddressFamily::V4, 42) {
            Incoming::Reply(parsed) => {
                assert_eq!(parsed.sequence, 3);
                assert_eq!(parsed.size, reply.len());
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn ipv4_header_with_other_protocol() {
        let reply = build_echo_reply(AddressFamily::V4, 42, 3, &[]);
        let mut datagram = with_ipv4_header(&reply);
        datagram[9] = 17;
        assert_eq!(
            parse_incoming(&datagram, AddressFamily::V4, 42),
            Incoming::Unexpected(Anomaly::NotIcmp(17))
        );
    }

    #[test]
    fn truncated_ipv4_header() {
        let datagram = [0x46, 0, 0, 28, 0, 0, 0, 0, 64, 1];
        assert_eq!(
            parse_incoming(&datagram, AddressFamily::V4, 1),
            Incoming::Unexpected(Anomaly::BadIpHeader)
        );
    }

    #[test]
    fn any_single_bit_flip_is_rejected() {
        let reply = build_echo_reply(AddressFamily::V4, 0x4242, 17, b"payload!x");
        for byte in 0..reply.len() {
            for bit in 0..8 {
                let mut corrupted = reply.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        parse_incoming(&corrupted, AddressFamily::V4, 0x4242),
                        Incoming::Unexpected(_)
                    ),
                    "flip of byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn short_packets_are_unexpected() {
        assert_eq!(
            parse_incoming(&[], AddressFamily::V4, 1),
            Incoming::Unexpected(Anomaly::TooShort)
        );
        assert_eq!(
            parse_incoming(&[129, 0, 0, 0], AddressFamily::V6, 1),
            Incoming::Unexpected(Anomaly::TooShort)
        );
    }

    #[test]
    fn requests_and_other_types_are_unexpected() {
        let request = build_echo_request(AddressFamily::V4, 5, 5, &[]);
        assert_eq!(
            parse_incoming(&request, AddressFamily::V4, 5),
            Incoming::Unexpected(Anomaly::NotEchoReply { icmp_type: 8, code: 0 })
        );

        let mut unreachable = build_echo_reply(AddressFamily::V6, 5, 5, &[]);
        unreachable[0] = 1;
        assert_eq!(
            parse_incoming(&unreachable, AddressFamily::V6, 5),
            Incoming::Unexpected(Anomaly::NotEchoReply { icmp_type: 1, code: 0 })
        );
    }

    #[test]
    fn nonzero_code_is_unexpected() {
        let mut reply = build_echo_reply(AddressFamily::V6, 5, 5, &[]);
        reply[1] = 1;
        assert!(matches!(
            parse_incoming(&reply, AddressFamily::V6, 5),
            Incoming::Unexpected(Anomaly::NotEchoReply { code: 1, .. })
        ));
    }

    #[test]
    fn family_mismatch_is_unexpected() {
        let v6_reply = build_echo_reply(AddressFamily::V6, 5, 5, &[]);
        assert!(matches!(
            parse_incoming(&v6_reply, AddressFamily::V4, 5),
            Incoming::Unexpected(Anomaly::NotEchoReply { icmp_type: 129, .. })
        ));

        let v4_reply = build_echo_reply(AddressFamily::V4, 5, 5, &[]);
        assert!(matches!(
            parse_incoming(&v4_reply, AddressFamily::V6, 5),
            Incoming::Unexpected(Anomaly::NotEchoReply { icmp_type: 0, .. })
        ));
    }

    #[test]
    fn foreign_identifier_is_unexpected() {
        let reply = build_echo_reply(AddressFamily::V4, 0x1111, 0, &[]);
        assert_eq!(
            parse_incoming(&reply, AddressFamily::V4, 0x2222),
            Incoming::Unexpected(Anomaly::ForeignIdentifier(0x1111))
        );
    }
}
