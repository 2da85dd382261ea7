//! Address Resolution Protocol frames, as used for collision probing and
//! gateway revalidation.
//!
//! Before accepting an offered address the client broadcasts an ARP request
//! for it with a zero sender address; any reply means some other host already
//! answers for that IP and the offer must be declined. The same request form
//! is used after a link bounce to ask whether the default gateway still
//! answers from the hardware address we recorded at bind time.
//!
//! Frames are sent and received with their Ethernet II header attached, and
//! received frames may arrive in pieces; a frame is complete once
//! [ARP_MSG_SIZE] bytes have accumulated.

use crate::{enum_with_unknown, EtherType, EthernetHeader, IpV4Addr, MacAddr};

use byte_struct::*;
use static_assertions::const_assert;

/// Bytes of Ethernet header + ARP payload that carry meaning; the rest of
/// the on-wire frame is padding up to the Ethernet minimum.
pub const ARP_MSG_SIZE: usize = EthernetHeader::BYTE_LEN + 28;

const_assert!(ArpPayload::BYTE_LEN == 46); // Make sure the ARP frame is at least sized for the minimum ethernet payload
const_assert!(ArpFrame::BYTE_LEN == 60);

/// An ARP request or response with IPV4 addresses and standard MAC addresses.
/// Assumes 6-byte standard MAC addresses and 4-byte IPV4 addresses.
/// See https://en.wikipedia.org/wiki/Address_Resolution_Protocol .
///
/// Hardware type is 1 for ethernet.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct ArpPayload {
    /// Hardware type (1 for ethernet)
    pub htype: u16,
    /// Protocol type (same as ethertype from ethernet header)
    pub ptype: EtherType,
    /// Hardware address length (6 for standard MAC)
    pub hlen: u8,
    /// Protocol address length (4 for IPV4)
    pub plen: u8,
    /// ARP operation type
    pub operation: ArpOperation,
    /// Source MAC address
    pub src_mac: MacAddr,
    /// Source IP address
    pub src_ipaddr: IpV4Addr,
    /// Destination MAC address
    pub dst_mac: MacAddr,
    /// Destination IP address
    pub dst_ipaddr: IpV4Addr,
    /// Pad to minimum frame size
    _pad0: u128,
    _pad1: u16,
}

/// A full on-wire ARP frame: Ethernet II header plus payload.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpFrame {
    /// Link-layer header; ethertype 0x0806
    pub header: EthernetHeader,
    /// The request or reply itself
    pub payload: ArpPayload,
}

impl ArpFrame {
    /// A broadcast ARP request probing for `target_ip`.
    ///
    /// `src_ipaddr` is zero when checking whether an offered address is
    /// already claimed (so the probe cannot be mistaken for an announcement)
    /// and our own address when revalidating the gateway.
    pub fn new_probe(src_mac: MacAddr, src_ipaddr: IpV4Addr, target_ip: IpV4Addr) -> Self {
        ArpFrame {
            header: EthernetHeader {
                dst_macaddr: MacAddr::BROADCAST,
                src_macaddr: src_mac,
                ethertype: EtherType::Arp,
            },
            payload: ArpPayload {
                htype: 1, // Always on ethernet
                ptype: EtherType::IpV4,
                hlen: 6,
                plen: 4,
                operation: ArpOperation::Request,
                src_mac,
                src_ipaddr,
                dst_mac: MacAddr::ANY, // tHaddr is zero-filled in a request
                dst_ipaddr: target_ip,
                _pad0: 0,
                _pad1: 0,
            },
        }
    }

    /// Whether this frame answers a probe for `probed_ip` sent from `our_mac`.
    ///
    /// A matching frame is a REPLY targeted at our hardware address whose
    /// sender protocol address is the probed IP. Some kernels deliver replies
    /// with a zeroed target hardware address, so all-zero is accepted too.
    pub fn is_reply_for(&self, probed_ip: IpV4Addr, our_mac: MacAddr) -> bool {
        self.payload.operation == ArpOperation::Reply
            && (self.payload.dst_mac == our_mac || self.payload.dst_mac == MacAddr::ANY)
            && self.payload.src_ipaddr == probed_ip
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

enum_with_unknown! {
    /// ARP request or response flag values
    pub enum ArpOperation(u16) {
        /// This is a request to confirm target IP address and acquire associated MAC address
        Request = 1,
        /// This is a response to confirm our IP address and provide associated MAC address
        Reply = 2,
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut bytes_read = [0_u8; 2];
        bytes_read.copy_from_slice(&bytes[0..=1]);
        ArpOperation::from(u16::from_be_bytes(bytes_read))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        let bytes_to_write = self.to_be_bytes();
        bytes[0] = bytes_to_write[0];
        bytes[1] = bytes_to_write[1];
    }
}

impl ArpOperation {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        u16::from(*self).to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an ARP message and make sure the parser returns the same values from the input
    #[test]
    fn test_serialization_loop() -> () {
        let msg = ArpFrame::new_probe(
            MacAddr::new([7_u8; 6]),
            IpV4Addr::new([8_u8; 4]),
            IpV4Addr::new([10_u8; 4]),
        );
        // Serialize
        let bytes = msg.to_be_bytes();
        // Deserialize
        let msg_parsed = ArpFrame::read_bytes(&bytes);

        assert_eq!(msg, msg_parsed);
        // htype/ptype/hlen/plen/op land after the 14-byte link header
        assert_eq!(&bytes[14..22], &[0, 1, 8, 0, 6, 4, 0, 1]);
    }

    fn reply(target_mac: MacAddr, sender_mac: MacAddr, sender_ip: IpV4Addr) -> ArpFrame {
        let mut frame = ArpFrame::new_probe(sender_mac, sender_ip, IpV4Addr::ANY);
        frame.payload.operation = ArpOperation::Reply;
        frame.payload.dst_mac = target_mac;
        frame
    }

    #[test]
    fn test_reply_filter_matches() {
        let our_mac = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
        let peer_mac = MacAddr::new([0x02, 0, 0, 0, 0, 2]);
        let probed = IpV4Addr::new([192, 0, 2, 10]);

        assert!(reply(our_mac, peer_mac, probed).is_reply_for(probed, our_mac));
        // Zeroed target hardware address is accepted (pre-2.6.24 kernels)
        assert!(reply(MacAddr::ANY, peer_mac, probed).is_reply_for(probed, our_mac));
    }

    #[test]
    fn test_reply_filter_rejects() {
        let our_mac = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
        let peer_mac = MacAddr::new([0x02, 0, 0, 0, 0, 2]);
        let probed = IpV4Addr::new([192, 0, 2, 10]);
        let other = IpV4Addr::new([192, 0, 2, 11]);

        // Wrong sender IP
        assert!(!reply(our_mac, peer_mac, other).is_reply_for(probed, our_mac));
        // Aimed at some other host
        assert!(!reply(peer_mac, peer_mac, probed).is_reply_for(probed, our_mac));
        // Requests are not replies
        let mut req = reply(our_mac, peer_mac, probed);
        req.payload.operation = ArpOperation::Request;
        assert!(!req.is_reply_for(probed, our_mac));
    }
}
