//! DHCP message construction and parsing
//!
//! The BOOTP fixed header is 236 bytes, followed by the 4-byte magic cookie
//! and a 308-byte options area, so a full message is 548 bytes and a full
//! IP + UDP + DHCP frame is exactly the 576-byte minimum-reassembly datagram
//! advertised in the max-message-size option.

use crate::dhcp::DHCP_MAGIC;
use crate::{enum_with_unknown, ByteArray, IpV4Addr, MacAddr};

use byte_struct::*;
use static_assertions::const_assert;

/// Size of the options area
pub const DHCP_OPTIONS_LEN: usize = 308;

const_assert!(DhcpMessage::BYTE_LEN == 548);

/// A full DHCP message: BOOTP fixed header, magic cookie, options area.
///
/// The options area is carried at its full size; a message parsed from a
/// shorter datagram is zero-filled past the received bytes, and zero is the
/// PAD option so the tail scans as empty.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct DhcpMessage {
    /// Message op code / message type. 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: DhcpOperation,
    /// Hardware type always 1 for ethernet
    pub htype: u8,
    /// Hardware address length always 6 bytes for standard mac address
    pub hlen: u8,
    /// Legacy field, always 0
    pub hops: u8,
    /// Transaction ID; fixed for the lifetime of a negotiation
    pub xid: u32,
    /// Seconds elapsed since client started transaction
    pub secs: u16,
    /// Broadcast flag in the high bit; zero for us
    pub flags: u16,
    /// Client IP Address; only filled in when renewing or releasing
    pub ciaddr: IpV4Addr,
    /// Your IP Address; the address being offered or acknowledged
    pub yiaddr: IpV4Addr,
    /// Next-server IP Address (BOOTP relic)
    pub siaddr: IpV4Addr,
    /// Relay agent IP Address (BOOTP relic)
    pub giaddr: IpV4Addr,
    /// Client hardware address. Actual field is 16 bytes; we only use 6 for standard MAC address.
    pub chaddr: MacAddr,
    /// Explicit padding of the remaining 10 bytes of chaddr
    chaddr_pad: ByteArray<10>,
    /// Server host name; may carry overloaded options
    pub sname: ByteArray<64>,
    /// Boot file name; may carry overloaded options
    pub file: ByteArray<128>,
    /// "Magic cookie" identifying this as a DHCP message.
    /// Must always have the value of 0x63_82_53_63 (in dhcp::DHCP_MAGIC)
    pub cookie: u32,
    /// Option TLVs, terminated by END (0xFF)
    pub options: ByteArray<DHCP_OPTIONS_LEN>,
}

impl DhcpMessage {
    /// A zeroed client request of the given kind: header defaults filled in,
    /// options area holding only the message-type option and END.
    pub fn new(kind: DhcpMessageKind, xid: u32, chaddr: MacAddr) -> Self {
        let mut options = [0_u8; DHCP_OPTIONS_LEN];
        options[0] = u8::from(DhcpOptionKind::DhcpMessageType);
        options[1] = 1;
        options[2] = u8::from(kind);
        options[3] = u8::from(DhcpOptionKind::End);
        DhcpMessage {
            op: DhcpOperation::Request,
            htype: 1_u8, // Always 1 for ethernet
            hlen: 6_u8,  // Always 6 byte standard mac address
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: IpV4Addr::ANY,
            yiaddr: IpV4Addr::ANY,
            siaddr: IpV4Addr::ANY,
            giaddr: IpV4Addr::ANY,
            chaddr,
            chaddr_pad: ByteArray([0_u8; 10]),
            sname: ByteArray([0_u8; 64]),
            file: ByteArray([0_u8; 128]),
            cookie: DHCP_MAGIC,
            options: ByteArray(options),
        }
    }

    /// Parse from a buffer that holds at least the fixed header and cookie.
    /// Anything shorter than the full message is zero-padded.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::BYTE_LEN - DHCP_OPTIONS_LEN {
            return None;
        }
        let mut full = [0_u8; Self::BYTE_LEN];
        let n = buf.len().min(Self::BYTE_LEN);
        full[..n].copy_from_slice(&buf[..n]);
        Some(Self::read_bytes(&full))
    }

    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0_u8; Self::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

enum_with_unknown! {
    /// Message op code / message type. 1 = BOOTREQUEST, 2 = BOOTREPLY
    /// Legacy operation type field from BOOTP.
    /// Still has to match and change value depending on message type even though
    /// there is only one valid combination of message type and operation.
    pub enum DhcpOperation(u8) {
        /// Anything coming from the client
        Request = 1,
        /// Anything coming from the server
        Reply = 2
    }
}

impl ByteStructLen for DhcpOperation {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Contents of option field kind 53
    pub enum DhcpMessageKind(u8) {
        /// Client broadcast to locate available servers.
        Discover = 1,
        /// Server to client in response to DHCPDISCOVER with offer of configuration parameters.
        Offer = 2,
        /// Client message to servers either (a) requesting
        /// offered parameters from one server and implicitly
        /// declining offers from all others, (b) confirming
        /// correctness of previously allocated address after,
        /// e.g., system reboot, or (c) extending the lease on a
        /// particular network address.
        Request = 3,
        /// Client to server indicating network address is already in use.
        Decline = 4,
        /// Server to client with configuration parameters, including committed network address.
        Ack = 5,
        /// Server to client indicating client's notion of network address is incorrect
        /// (e.g., client has moved to new subnet) or client's lease as expired
        Nak = 6,
        /// Client to server relinquishing network address and cancelling remaining lease.
        Release = 7,
        /// Client to server, asking only for local configuration parameters.
        /// Client already has externally configured network address.
        Inform = 8,
    }
}

impl std::fmt::Display for DhcpMessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
            Self::Unknown(x) => write!(f, "UNKNOWN({x})"),
        }
    }
}

impl ByteStructLen for DhcpMessageKind {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpMessageKind {
    fn read_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

enum_with_unknown! {
    /// Option type codes for the options we generate or consume.
    pub enum DhcpOptionKind(u8) {
        Pad = 0,
        SubnetMask = 1,
        TimeOffset = 2,
        Router = 3,
        TimeServer = 4,
        NameServer = 5,
        DomainNameServers = 6,
        LogServer = 7,
        CookieServer = 8,
        LprServer = 9,
        HostName = 12,
        BootFileSize = 13,
        DomainName = 15,
        SwapServer = 16,
        RootPath = 17,
        DefaultIpTtl = 23,
        InterfaceMtu = 26,
        BroadcastAddress = 28,
        NisDomain = 40,
        NisServers = 41,
        NtpServers = 42,
        WinsServers = 44,
        RequestedIpAddress = 50,
        IpAddressLeaseTime = 51,
        OptionOverload = 52,
        /// This option's contents indicate how the rest of the message should be parsed
        DhcpMessageType = 53,
        ServerIdentifier = 54,
        ParameterRequestList = 55,
        Message = 56,
        MaxDhcpMessageSize = 57,
        /// Time in seconds until start of renewal (half of lease duration)
        RenewalTime = 58,
        RebindingTime = 59,
        VendorClassId = 60,
        ClientId = 61,
        End = 255,
    }
}

impl ByteStructLen for DhcpOptionKind {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for DhcpOptionKind {
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

    #[test]
    fn test_serialization_loop() {
        let msg = DhcpMessage::new(
            DhcpMessageKind::Discover,
            0x11223344,
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
        );

        let bytes = msg.to_be_bytes();
        let parsed = DhcpMessage::read_bytes(&bytes);
        assert_eq!(parsed, msg);

        // xid and cookie are big-endian on the wire
        assert_eq!(&bytes[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&bytes[236..240], &[0x63, 0x82, 0x53, 0x63]);
        // Options open with the message-type TLV and END
        assert_eq!(&bytes[240..244], &[53, 1, 1, 255]);
    }

    #[test]
    fn test_short_parse_zero_fills() {
        let msg = DhcpMessage::new(
            DhcpMessageKind::Offer,
            7,
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
        );
        let bytes = msg.to_be_bytes();
        // Chop the message after the message-type option
        let parsed = DhcpMessage::from_bytes(&bytes[..243]).unwrap();
        assert_eq!(parsed.xid, 7);
        assert_eq!(parsed.cookie, DHCP_MAGIC);

        // Too short to hold the cookie: rejected
        assert!(DhcpMessage::from_bytes(&bytes[..200]).is_none());
    }
}
