//! A DHCPv4 client daemon for a single Ethernet interface.
//!
//! The crate is split into a wire-codec layer (Ethernet/ARP, IPv4, UDP, and
//! the BOOTP/DHCP message format) and a daemon layer (socket management, an
//! epoll/signalfd event loop, the RFC 2131 state machine, and an ARP prober
//! that verifies offered addresses and revalidates the default gateway).
//!
//! Interface configuration itself is delegated to an external `ifchd`
//! process reached over a local stream socket; this daemon only negotiates
//! the lease and reports the results.
//!
//! ```rust
//! use ndhc::*;
//!
//! // Wire types parse from and serialize to network byte order.
//! let mac = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
//! let ip = IpV4Addr::new([192, 0, 2, 10]);
//! assert_eq!(format!("{mac}"), "02:00:00:00:00:01");
//! assert_eq!(format!("{ip}"), "192.0.2.10");
//! ```

use core::fmt;

pub use byte_struct::{ByteStruct, ByteStructLen};

pub mod enet; // Link layer
pub mod ip; // Internet layer
pub mod udp; // Transport layer

pub mod arp; // Address Resolution Protocol - collision probing and gateway revalidation both ride on it.
pub mod dhcp; // Dynamic Host Configuration Protocol - message codec and client state machine.

pub mod config;
pub mod eventloop;
pub mod ifchd;
pub mod io;
pub mod privs;
pub mod probe;
pub mod sockets;
pub mod sys;

pub use arp::*;
pub use dhcp::*;
pub use enet::*;
pub use ip::*;
pub use udp::*;

/// Fatal errors. Anything recoverable (malformed frames, transient I/O)
/// is logged and retried at the call site instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("syscall failed: {0}")]
    Sys(#[from] nix::Error),
    #[error("interface {0}: {1}")]
    Interface(String, &'static str),
    #[error("unable to connect to ifchd: {0}")]
    Ifchd(std::io::Error),
    #[error("{0}")]
    Startup(String),
}

/// Standard 6-byte MAC address.
/// Split 24/24 format, Block ID | Device ID .
/// Locally-administered addresses are [0x02, ...], [0x06, ...], [0x0A, ...], [0x0E, ...]
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// IPV4 address as bytes
pub type IpV4Addr = ByteArray<4>;

impl IpV4Addr {
    /// New from bytes
    pub fn new(v: [u8; 4]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: IpV4Addr = ByteArray([0xFF_u8; 4]);

    /// Any address (all zeroes)
    pub const ANY: IpV4Addr = ByteArray([0x0_u8; 4]);

    /// Big-endian u32 view, for comparisons against raw option data
    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// From a big-endian u32
    pub fn from_u32(v: u32) -> Self {
        ByteArray(v.to_be_bytes())
    }
}

impl fmt::Display for IpV4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(f, "{}.{}.{}.{}", a[0], a[1], a[2], a[3])
    }
}

impl From<std::net::Ipv4Addr> for IpV4Addr {
    fn from(a: std::net::Ipv4Addr) -> Self {
        ByteArray(a.octets())
    }
}

impl From<IpV4Addr> for std::net::Ipv4Addr {
    fn from(a: IpV4Addr) -> Self {
        std::net::Ipv4Addr::from(a.0)
    }
}

/// Newtype for [u8; N] in order to be able to implement traits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..N].copy_from_slice(&self.0);
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Calculate IP checksum per IETF-RFC-768
/// following implementation guide in IETF-RFC-1071 section 4.1 .
/// See <https://datatracker.ietf.org/doc/html/rfc1071#section-4> .
pub fn calc_ip_checksum(data: &[u8]) -> u16 {
    // Partial calc
    let sum = calc_ip_checksum_incomplete(data);
    // Fold and flip
    let checksum = calc_ip_checksum_finalize(sum);

    checksum
}

/// Finalize an IP checksum by folding the accumulator from a [u32]
/// to a [u16] and taking the one's complement
pub fn calc_ip_checksum_finalize(sum: u32) -> u16 {
    // Copy to avoid mutating the input, which may be used for something else
    // since some checksums relate to overlapping data
    let mut sum = sum;

    // Fold 32-bit accumulator into 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    // Convert to u16 and take bitwise complement
    let checksum = !(sum as u16);

    checksum
}

/// Calculate an IP checksum on incomplete data
/// returning the unfolded accumulator as [u32]
pub fn calc_ip_checksum_incomplete(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;

    for (i, x) in data.iter().enumerate() {
        if i % 2 == 0 {
            sum += (*x as u32) << 8;
        } else {
            sum += *x as u32;
        };
    }

    sum
}

#[cfg(test)]
mod test {

    use crate::*;

    #[test]
    fn test_calc_ip_checksum() -> () {
        let src_ipaddr: IpV4Addr = IpV4Addr::new([10, 0, 0, 1]);
        let dst_ipaddr: IpV4Addr = IpV4Addr::new([10, 0, 0, 2]);
        let mut sample_ipv4_header =
            IpV4Header::new_udp(IpV4Header::BYTE_LEN as u16 + 28, src_ipaddr, dst_ipaddr);
        let checksum_pre = calc_ip_checksum(&sample_ipv4_header.to_be_bytes());
        sample_ipv4_header.checksum = checksum_pre;
        let checksum_post = calc_ip_checksum(&sample_ipv4_header.to_be_bytes());

        assert!(checksum_post == 0)
    }

    #[test]
    fn test_addr_display() {
        let ip = IpV4Addr::new([192, 0, 2, 1]);
        assert_eq!(ip.to_string(), "192.0.2.1");
        let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        assert_eq!(mac.to_string(), "aa:bb:cc:00:11:22");
    }
}
