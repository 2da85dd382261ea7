//! Internet layer: Internet Protocol message header construction

use crate::{enum_with_unknown, IpV4Addr};

use byte_struct::*;
use modular_bitfield::prelude::*;

/// First octet of the IPv4 header: version in the high nibble,
/// header length (in 32-bit words) in the low nibble.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionAndHeaderLength {
    pub header_length: B4,
    pub version: B4,
}

impl ByteStructLen for VersionAndHeaderLength {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for VersionAndHeaderLength {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from_bytes([bytes[0]])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.into_bytes()[0];
    }
}

/// Flags and fragment offset. Wire layout (big-endian u16):
/// bit 15 reserved, bit 14 DF, bit 13 MF, bits 12..0 offset.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragmentation {
    pub offset: B13,
    pub more_fragments: bool,
    pub do_not_fragment: bool,
    #[skip]
    __: B1,
}

impl ByteStructLen for Fragmentation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for Fragmentation {
    fn read_bytes(bytes: &[u8]) -> Self {
        // The bitfield packs least-significant bits first; the wire is big-endian
        Self::from_bytes([bytes[1], bytes[0]])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let b = self.into_bytes();
        bytes[0] = b[1];
        bytes[1] = b[0];
    }
}

/// IPV4 header per IETF-RFC-791, without options (ihl = 5)
///
/// See https://en.wikipedia.org/wiki/IPv4
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct IpV4Header {
    pub version_and_length: VersionAndHeaderLength,
    pub dscp: DSCP,
    /// Total length of IP header + payload, in bytes
    pub total_length: u16,
    pub identification: u16,
    pub fragmentation: Fragmentation,
    pub time_to_live: u8,
    pub protocol: Protocol,
    /// One's-complement checksum over the header with this field zeroed
    pub checksum: u16,
    pub src_ipaddr: IpV4Addr,
    pub dst_ipaddr: IpV4Addr,
}

impl IpV4Header {
    /// A UDP header with no fragmentation and the checksum not yet filled in
    pub fn new_udp(total_length: u16, src_ipaddr: IpV4Addr, dst_ipaddr: IpV4Addr) -> Self {
        IpV4Header {
            version_and_length: VersionAndHeaderLength::new()
                .with_version(4)
                .with_header_length((Self::BYTE_LEN / 4) as u8),
            dscp: DSCP::Standard,
            total_length,
            identification: 0,
            fragmentation: Fragmentation::new(),
            time_to_live: 64,
            protocol: Protocol::Udp,
            checksum: 0,
            src_ipaddr,
            dst_ipaddr,
        }
    }

    /// Pack into big-endian (network) byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut header_bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut header_bytes);

        header_bytes
    }
}

enum_with_unknown! {
    /// Common choices of transport-layer protocols and their IP header values.
    /// There are many more protocols not listed here.
    /// See <https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers>.
    pub enum Protocol(u8) {
        /// Transmission Control Protocol
        Tcp = 0x06,
        /// User Datagram Protocol
        Udp = 0x11,
    }
}

impl ByteStructLen for Protocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Protocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Type-of-Service for networks with differentiated services.
    /// See <https://en.wikipedia.org/wiki/Differentiated_services>.
    pub enum DSCP(u8) {
        /// Standard is almost always fine
        Standard = 0,
        /// Realtime is rarely used
        Realtime = 128,
    }
}

impl ByteStructLen for DSCP {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DSCP {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use static_assertions::const_assert;

    const_assert!(IpV4Header::BYTE_LEN == 20);

    #[test]
    fn test_serialization_loop() {
        let header = IpV4Header::new_udp(
            576,
            IpV4Addr::new([0, 0, 0, 0]),
            IpV4Addr::new([255, 255, 255, 255]),
        );
        let bytes = header.to_be_bytes();
        // Version/IHL octet and big-endian total length land where expected
        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[2..4], &[0x02, 0x40]);
        assert_eq!(bytes[9], 0x11);

        let parsed = IpV4Header::read_bytes(&bytes);
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_fragmentation_bits() {
        let frag = Fragmentation::new().with_do_not_fragment(true);
        let mut bytes = [0_u8; 2];
        frag.write_bytes(&mut bytes);
        // DF is bit 14 of the big-endian word
        assert_eq!(bytes, [0x40, 0x00]);
        assert_eq!(Fragmentation::read_bytes(&bytes), frag);
    }
}
