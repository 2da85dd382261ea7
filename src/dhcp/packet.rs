//! Raw-socket frame assembly and validation.
//!
//! Pre-binding, the client has no address, so replies cannot arrive through
//! the UDP stack; instead whole IP + UDP + DHCP frames are exchanged on a
//! packet socket and the IP and UDP layers are built and checked here.

use crate::dhcp::options::{add_option, DhcpOptionKind};
use crate::dhcp::protocol::DhcpMessage;
use crate::dhcp::{DHCP_CLIENT_PORT, DHCP_MAGIC, DHCP_SERVER_PORT, VENDOR_CLASS_ID};
use crate::{
    calc_ip_checksum, calc_ip_checksum_finalize, calc_ip_checksum_incomplete, ByteStruct,
    ByteStructLen, IpV4Addr, MacAddr,
};
use crate::{DhcpMessageKind, IpV4Header, Protocol, UdpHeader};

use static_assertions::const_assert;

/// A full IP + UDP + DHCP frame
pub const RAW_DHCP_FRAME_LEN: usize =
    IpV4Header::BYTE_LEN + UdpHeader::BYTE_LEN + DhcpMessage::BYTE_LEN;

const_assert!(RAW_DHCP_FRAME_LEN == 576);

const HDRS_LEN: usize = IpV4Header::BYTE_LEN + UdpHeader::BYTE_LEN;

/// Reasons a received frame is discarded. None of these advance the state
/// machine; the frame is logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameReject {
    #[error("message too short to contain IP + UDP headers")]
    TooShort,
    #[error("truncated packet")]
    Truncated,
    #[error("IP header is not UDP")]
    NotUdp,
    #[error("IP version is not IPv4")]
    NotIpV4,
    #[error("IP header length incorrect")]
    BadIhl,
    #[error("UDP destination port incorrect")]
    WrongPort,
    #[error("data longer than an IP+UDP+DHCP message")]
    Oversize,
    #[error("UDP header length incorrect")]
    BadUdpLength,
    #[error("bad IP header checksum")]
    BadIpChecksum,
    #[error("bad UDP checksum")]
    BadUdpChecksum,
    #[error("bad magic cookie")]
    BadCookie,
}

/// RFC 768 pseudo-header contribution to the UDP checksum
fn pseudo_header_sum(src: IpV4Addr, dst: IpV4Addr, udp_len: u16) -> u32 {
    let mut pseudo = [0_u8; 12];
    pseudo[0..4].copy_from_slice(&src.0);
    pseudo[4..8].copy_from_slice(&dst.0);
    pseudo[9] = u8::from(Protocol::Udp);
    pseudo[10..12].copy_from_slice(&udp_len.to_be_bytes());
    calc_ip_checksum_incomplete(&pseudo)
}

/// Wrap a DHCP message in IP + UDP headers with both checksums filled in,
/// ready to hand to a packet socket. Source is `src_ip:68`, destination
/// `dst_ip:67`.
pub fn assemble_raw_frame(
    msg: &DhcpMessage,
    src_ip: IpV4Addr,
    dst_ip: IpV4Addr,
) -> [u8; RAW_DHCP_FRAME_LEN] {
    let payload = msg.to_be_bytes();
    let udp_len = (UdpHeader::BYTE_LEN + payload.len()) as u16;

    let mut frame = [0_u8; RAW_DHCP_FRAME_LEN];
    frame[HDRS_LEN..].copy_from_slice(&payload);

    let mut udp = UdpHeader::new(DHCP_CLIENT_PORT, DHCP_SERVER_PORT, udp_len);
    udp.write_bytes(&mut frame[IpV4Header::BYTE_LEN..HDRS_LEN]);
    let sum = pseudo_header_sum(src_ip, dst_ip, udp_len)
        + calc_ip_checksum_incomplete(&frame[IpV4Header::BYTE_LEN..]);
    let mut csum = calc_ip_checksum_finalize(sum);
    if csum == 0 {
        // RFC 768: a computed zero is transmitted as all-ones
        csum = 0xFFFF;
    }
    udp.checksum = csum;
    udp.write_bytes(&mut frame[IpV4Header::BYTE_LEN..HDRS_LEN]);

    let mut ip = IpV4Header::new_udp(RAW_DHCP_FRAME_LEN as u16, src_ip, dst_ip);
    ip.checksum = calc_ip_checksum(&ip.to_be_bytes());
    ip.write_bytes(&mut frame[..IpV4Header::BYTE_LEN]);

    frame
}

/// Validate and strip the IP + UDP framing of a received raw frame,
/// returning the DHCP message inside.
pub fn parse_raw_frame(buf: &[u8]) -> Result<DhcpMessage, FrameReject> {
    if buf.len() < HDRS_LEN {
        return Err(FrameReject::TooShort);
    }
    let ip = IpV4Header::read_bytes(&buf[..IpV4Header::BYTE_LEN]);
    let udp = UdpHeader::read_bytes(&buf[IpV4Header::BYTE_LEN..HDRS_LEN]);

    let len = ip.total_length as usize;
    if len > buf.len() {
        return Err(FrameReject::Truncated);
    }
    if len < HDRS_LEN {
        return Err(FrameReject::TooShort);
    }
    // Any bytes past tot_len are link-layer padding; ignore them
    if ip.protocol != Protocol::Udp {
        return Err(FrameReject::NotUdp);
    }
    if ip.version_and_length.version() != 4 {
        return Err(FrameReject::NotIpV4);
    }
    if ip.version_and_length.header_length() != 5 {
        return Err(FrameReject::BadIhl);
    }
    if udp.dst_port != DHCP_CLIENT_PORT {
        return Err(FrameReject::WrongPort);
    }
    if len > RAW_DHCP_FRAME_LEN {
        return Err(FrameReject::Oversize);
    }
    if udp.length as usize != len - IpV4Header::BYTE_LEN {
        return Err(FrameReject::BadUdpLength);
    }

    // A header carrying a correct checksum sums to all-ones, which
    // finalizes to zero
    if calc_ip_checksum(&buf[..IpV4Header::BYTE_LEN]) != 0 {
        return Err(FrameReject::BadIpChecksum);
    }
    // A zero UDP checksum means the sender did not compute one
    if udp.checksum != 0 {
        let sum = pseudo_header_sum(ip.src_ipaddr, ip.dst_ipaddr, udp.length)
            + calc_ip_checksum_incomplete(&buf[IpV4Header::BYTE_LEN..len]);
        if calc_ip_checksum_finalize(sum) != 0 {
            return Err(FrameReject::BadUdpChecksum);
        }
    }

    let msg = DhcpMessage::from_bytes(&buf[HDRS_LEN..len]).ok_or(FrameReject::TooShort)?;
    if msg.cookie != DHCP_MAGIC {
        return Err(FrameReject::BadCookie);
    }
    Ok(msg)
}

/// Validate a datagram received on the bound UDP socket (no IP/UDP framing
/// to check; the kernel already did that).
pub fn parse_cooked(buf: &[u8]) -> Result<DhcpMessage, FrameReject> {
    let msg = DhcpMessage::from_bytes(buf).ok_or(FrameReject::TooShort)?;
    if msg.cookie != DHCP_MAGIC {
        return Err(FrameReject::BadCookie);
    }
    Ok(msg)
}

/// A client message of the given kind with the identification options every
/// request carries: client-id, optional host name, and the vendor class.
pub fn init_packet(
    kind: DhcpMessageKind,
    xid: u32,
    chaddr: MacAddr,
    client_id: &[u8],
    hostname: Option<&[u8]>,
) -> DhcpMessage {
    let mut msg = DhcpMessage::new(kind, xid, chaddr);
    add_option(&mut msg, DhcpOptionKind::ClientId, client_id);
    if let Some(name) = hostname {
        add_option(&mut msg, DhcpOptionKind::HostName, name);
    }
    add_option(&mut msg, DhcpOptionKind::VendorClassId, VENDOR_CLASS_ID);
    msg
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::options::{add_option_u32, get_option};

    fn sample_message() -> DhcpMessage {
        let mut msg = init_packet(
            DhcpMessageKind::Discover,
            0x11223344,
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
            &[1, 0x02, 0, 0, 0, 0, 1],
            Some(b"larch"),
        );
        add_option_u32(&mut msg, DhcpOptionKind::IpAddressLeaseTime, 3600);
        msg
    }

    #[test]
    fn test_raw_frame_roundtrip() {
        let msg = sample_message();
        let frame = assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST);
        let parsed = parse_raw_frame(&frame).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_udp_checksum_zero_accepted() {
        let msg = sample_message();
        let mut frame = assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST);
        frame[26] = 0;
        frame[27] = 0;
        assert_eq!(parse_raw_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_checksum_rejects() {
        let msg = sample_message();
        let mut frame = assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST);
        frame[12] ^= 0x01; // perturb src address -> IP checksum no longer holds
        assert_eq!(parse_raw_frame(&frame), Err(FrameReject::BadIpChecksum));

        let mut frame = assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST);
        frame[100] ^= 0x01; // perturb payload -> UDP checksum no longer holds
        assert_eq!(parse_raw_frame(&frame), Err(FrameReject::BadUdpChecksum));
    }

    #[test]
    fn test_framing_rejects() {
        let msg = sample_message();
        let frame = assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST);

        assert_eq!(parse_raw_frame(&frame[..20]), Err(FrameReject::TooShort));
        assert_eq!(parse_raw_frame(&frame[..500]), Err(FrameReject::Truncated));

        let mut f = frame;
        f[9] = 0x06; // TCP
        assert_eq!(parse_raw_frame(&f), Err(FrameReject::NotUdp));

        let mut f = frame;
        f[23] = 69; // some other destination port
        assert_eq!(parse_raw_frame(&f), Err(FrameReject::WrongPort));
    }

    #[test]
    fn test_cooked_parse_checks_cookie() {
        let msg = sample_message();
        let mut bytes = msg.to_be_bytes();
        assert_eq!(parse_cooked(&bytes).unwrap(), msg);
        bytes[236] = 0;
        assert_eq!(parse_cooked(&bytes), Err(FrameReject::BadCookie));
    }

    #[test]
    fn test_init_packet_identification() {
        let msg = sample_message();
        assert_eq!(get_option(&msg, DhcpOptionKind::VendorClassId).unwrap(), b"ndhc");
        assert_eq!(
            get_option(&msg, DhcpOptionKind::ClientId).unwrap(),
            &[1, 0x02, 0, 0, 0, 0, 1]
        );
        assert_eq!(get_option(&msg, DhcpOptionKind::HostName).unwrap(), b"larch");
        assert_eq!(msg.chaddr, MacAddr::new([0x02, 0, 0, 0, 0, 1]));
    }
}
