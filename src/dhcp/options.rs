//! Option TLV machinery: the descriptor table, lookup with OVERLOAD support,
//! and append operations used when building client messages.

pub use crate::dhcp::protocol::DhcpOptionKind;
use crate::dhcp::protocol::DhcpMessage;
use crate::IpV4Addr;

use log::warn;

/// OVERLOAD (52) bitmap: options continue into the `file` field
pub const OVERLOAD_FILE: u8 = 1;
/// OVERLOAD (52) bitmap: options continue into the `sname` field
pub const OVERLOAD_SNAME: u8 = 2;

/// Base value type of an option, per RFC 2132
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Ip,
    U8,
    U16,
    S16,
    U32,
    S32,
    Str,
}

impl OptionType {
    /// Wire size of a single element; strings are free-length
    pub fn size(self) -> usize {
        match self {
            OptionType::Ip | OptionType::U32 | OptionType::S32 => 4,
            OptionType::U16 | OptionType::S16 => 2,
            OptionType::U8 => 1,
            OptionType::Str => 0,
        }
    }
}

/// One row of the option table: code, the name the configurator knows the
/// option by, its value type, whether it belongs in the parameter request
/// list, and whether the value may repeat.
pub struct OptionDesc {
    pub code: DhcpOptionKind,
    pub name: &'static str,
    pub kind: OptionType,
    pub req: bool,
    pub list: bool,
}

const fn desc(
    code: DhcpOptionKind,
    name: &'static str,
    kind: OptionType,
    req: bool,
    list: bool,
) -> OptionDesc {
    OptionDesc {
        code,
        name,
        kind,
        req,
        list,
    }
}

/// The options this client understands. Order matters: the parameter request
/// list is emitted in table order.
pub static OPTIONS: &[OptionDesc] = &[
    desc(DhcpOptionKind::SubnetMask, "subnet", OptionType::Ip, true, false),
    desc(DhcpOptionKind::TimeOffset, "timezone", OptionType::S32, false, false),
    desc(DhcpOptionKind::Router, "router", OptionType::Ip, true, true),
    desc(DhcpOptionKind::TimeServer, "timesvr", OptionType::Ip, false, true),
    desc(DhcpOptionKind::NameServer, "namesvr", OptionType::Ip, false, true),
    desc(DhcpOptionKind::DomainNameServers, "dns", OptionType::Ip, true, true),
    desc(DhcpOptionKind::LogServer, "logsvr", OptionType::Ip, false, true),
    desc(DhcpOptionKind::CookieServer, "cookiesvr", OptionType::Ip, false, true),
    desc(DhcpOptionKind::LprServer, "lprsvr", OptionType::Ip, false, true),
    desc(DhcpOptionKind::HostName, "hostname", OptionType::Str, true, false),
    desc(DhcpOptionKind::BootFileSize, "bootsize", OptionType::U16, false, false),
    desc(DhcpOptionKind::DomainName, "domain", OptionType::Str, true, false),
    desc(DhcpOptionKind::SwapServer, "swapsvr", OptionType::Ip, false, false),
    desc(DhcpOptionKind::RootPath, "rootpath", OptionType::Str, false, false),
    desc(DhcpOptionKind::DefaultIpTtl, "ipttl", OptionType::U8, false, false),
    desc(DhcpOptionKind::InterfaceMtu, "mtu", OptionType::U16, true, false),
    desc(DhcpOptionKind::BroadcastAddress, "broadcast", OptionType::Ip, true, false),
    desc(DhcpOptionKind::NisDomain, "nisdomain", OptionType::Str, false, false),
    desc(DhcpOptionKind::NisServers, "nissrv", OptionType::Ip, false, true),
    desc(DhcpOptionKind::NtpServers, "ntpsrv", OptionType::Ip, false, true),
    desc(DhcpOptionKind::WinsServers, "wins", OptionType::Ip, true, true),
    desc(DhcpOptionKind::RequestedIpAddress, "requestip", OptionType::Ip, false, false),
    desc(DhcpOptionKind::IpAddressLeaseTime, "lease", OptionType::U32, false, false),
    desc(DhcpOptionKind::DhcpMessageType, "dhcptype", OptionType::U8, false, false),
    desc(DhcpOptionKind::ServerIdentifier, "serverid", OptionType::Ip, false, false),
    desc(DhcpOptionKind::Message, "message", OptionType::Str, false, false),
];

/// Look up the descriptor for an option code
pub fn option_desc(code: DhcpOptionKind) -> Option<&'static OptionDesc> {
    OPTIONS.iter().find(|d| d.code == code)
}

const PAD: u8 = 0;
const END: u8 = 255;
const CODE_OVERLOAD: u8 = 52;

/// Scan one option area for `code`, also collecting any OVERLOAD bitmap
/// encountered along the way. Returns the value bounds on a hit.
fn scan_area(buf: &[u8], code: u8, overload: &mut u8) -> Option<(usize, usize)> {
    let mut i = 0_usize;
    while i + 1 < buf.len() {
        match buf[i] {
            PAD => i += 1,
            END => break,
            c => {
                let len = buf[i + 1] as usize;
                if i + 2 + len > buf.len() {
                    warn!("option 0x{c:02x} runs past the end of its field, stopping scan");
                    break;
                }
                if c == code {
                    return Some((i + 2, i + 2 + len));
                }
                if c == CODE_OVERLOAD && len >= 1 {
                    *overload |= buf[i + 2];
                }
                i += 2 + len;
            }
        }
    }
    None
}

/// Find an option's raw value bytes, following OVERLOAD into the `file`
/// and/or `sname` fields when the bitmap says to.
pub fn get_option(msg: &DhcpMessage, code: DhcpOptionKind) -> Option<&[u8]> {
    let code = u8::from(code);
    let mut overload = 0_u8;

    if let Some((a, b)) = scan_area(&msg.options.0, code, &mut overload) {
        return Some(&msg.options.0[a..b]);
    }
    if overload & OVERLOAD_FILE != 0 {
        if let Some((a, b)) = scan_area(&msg.file.0, code, &mut overload) {
            return Some(&msg.file.0[a..b]);
        }
    }
    if overload & OVERLOAD_SNAME != 0 {
        if let Some((a, b)) = scan_area(&msg.sname.0, code, &mut overload) {
            return Some(&msg.sname.0[a..b]);
        }
    }
    None
}

/// An option's value with its length validated against the descriptor:
/// exact element size, or a positive multiple of it for LIST options.
/// A mismatch is logged and treated as absence.
pub fn get_option_checked<'a>(msg: &'a DhcpMessage, desc: &OptionDesc) -> Option<&'a [u8]> {
    let data = get_option(msg, desc.code)?;
    let elem = desc.kind.size();
    if elem == 0 {
        // Free-length string
        return Some(data);
    }
    let ok = if desc.list {
        !data.is_empty() && data.len() % elem == 0
    } else {
        data.len() == elem
    };
    if !ok {
        warn!(
            "bad data received - option size mismatch: code=0x{:02x} expected={} got={}",
            u8::from(desc.code),
            elem,
            data.len()
        );
        return None;
    }
    Some(data)
}

/// A single-IP option (length exactly 4, or the first element of a LIST)
pub fn get_option_ip(msg: &DhcpMessage, code: DhcpOptionKind) -> Option<IpV4Addr> {
    let desc = option_desc(code)?;
    let data = get_option_checked(msg, desc)?;
    if data.len() < 4 {
        return None;
    }
    Some(IpV4Addr::new([data[0], data[1], data[2], data[3]]))
}

/// A u32 option, converted out of network byte order
pub fn get_option_u32(msg: &DhcpMessage, code: DhcpOptionKind) -> Option<u32> {
    let data = get_option(msg, code)?;
    if data.len() != 4 {
        warn!(
            "bad data received - option size mismatch: code=0x{:02x} expected=4 got={}",
            u8::from(code),
            data.len()
        );
        return None;
    }
    Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// The message-type option, which every server reply must carry
pub fn message_kind(msg: &DhcpMessage) -> Option<crate::dhcp::DhcpMessageKind> {
    let data = get_option(msg, DhcpOptionKind::DhcpMessageType)?;
    if data.len() != 1 {
        return None;
    }
    Some(crate::dhcp::DhcpMessageKind::from(data[0]))
}

/// Index of the END sentinel in the options area
fn end_index(opts: &[u8]) -> Option<usize> {
    let mut i = 0_usize;
    while i < opts.len() {
        match opts[i] {
            END => return Some(i),
            PAD => i += 1,
            _ => {
                if i + 1 >= opts.len() {
                    return None;
                }
                i += 2 + opts[i + 1] as usize;
            }
        }
    }
    None
}

/// Append a TLV ahead of the END sentinel. Refuses (logging) when fewer than
/// `data.len() + 3` bytes remain so END always fits afterwards.
pub fn add_option(msg: &mut DhcpMessage, code: DhcpOptionKind, data: &[u8]) -> bool {
    let opts = &mut msg.options.0;
    let end = match end_index(opts) {
        Some(i) => i,
        None => {
            warn!("options area has no END marker, dropping option 0x{:02x}", u8::from(code));
            return false;
        }
    };
    if end + data.len() + 3 > opts.len() {
        warn!("option 0x{:02x} does not fit, dropping", u8::from(code));
        return false;
    }
    opts[end] = u8::from(code);
    opts[end + 1] = data.len() as u8;
    opts[end + 2..end + 2 + data.len()].copy_from_slice(data);
    opts[end + 2 + data.len()] = END;
    true
}

/// Append a 4-byte option out of a host u32
pub fn add_option_u32(msg: &mut DhcpMessage, code: DhcpOptionKind, value: u32) -> bool {
    add_option(msg, code, &value.to_be_bytes())
}

/// Append a 2-byte option out of a host u16
pub fn add_option_u16(msg: &mut DhcpMessage, code: DhcpOptionKind, value: u16) -> bool {
    add_option(msg, code, &value.to_be_bytes())
}

/// Append the parameter request list: the code of every REQ-flagged
/// descriptor, in table order.
pub fn add_requests(msg: &mut DhcpMessage) -> bool {
    let codes: Vec<u8> = OPTIONS
        .iter()
        .filter(|d| d.req)
        .map(|d| u8::from(d.code))
        .collect();
    add_option(msg, DhcpOptionKind::ParameterRequestList, &codes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::protocol::DHCP_OPTIONS_LEN;
    use crate::dhcp::DhcpMessageKind;
    use crate::MacAddr;

    fn msg() -> DhcpMessage {
        DhcpMessage::new(DhcpMessageKind::Ack, 1, MacAddr::new([2, 0, 0, 0, 0, 1]))
    }

    #[test]
    fn test_add_then_get() {
        let mut m = msg();
        assert!(add_option_u32(&mut m, DhcpOptionKind::IpAddressLeaseTime, 3600));
        assert!(add_option(&mut m, DhcpOptionKind::HostName, b"spruce"));

        assert_eq!(
            get_option(&m, DhcpOptionKind::IpAddressLeaseTime).unwrap(),
            &3600_u32.to_be_bytes()
        );
        assert_eq!(get_option_u32(&m, DhcpOptionKind::IpAddressLeaseTime), Some(3600));
        assert_eq!(get_option(&m, DhcpOptionKind::HostName).unwrap(), b"spruce");
        assert_eq!(get_option(&m, DhcpOptionKind::Router), None);
        assert_eq!(message_kind(&m), Some(DhcpMessageKind::Ack));
    }

    #[test]
    fn test_pad_skipped() {
        let mut m = msg();
        // Shift the existing options area right by hand-inserting PADs
        let mut opts = [0_u8; DHCP_OPTIONS_LEN];
        opts[0] = 0; // PAD
        opts[1] = 0; // PAD
        opts[2] = 53;
        opts[3] = 1;
        opts[4] = 5;
        opts[5] = 255;
        m.options.0 = opts;
        assert_eq!(message_kind(&m), Some(DhcpMessageKind::Ack));
    }

    #[test]
    fn test_scan_stops_at_end() {
        let mut m = msg();
        // Place a lease option after END; it must be invisible
        let opts = &mut m.options.0;
        let end = 3;
        assert_eq!(opts[end], 255);
        opts[end + 1] = 51;
        opts[end + 2] = 4;
        opts[end + 3..end + 7].copy_from_slice(&60_u32.to_be_bytes());
        assert_eq!(get_option(&m, DhcpOptionKind::IpAddressLeaseTime), None);
    }

    #[test]
    fn test_overload_into_file_and_sname() {
        let mut m = msg();
        assert!(add_option(&mut m, DhcpOptionKind::OptionOverload, &[OVERLOAD_FILE | OVERLOAD_SNAME]));
        // Host name hides in `file`, domain in `sname`
        m.file.0[0] = 12;
        m.file.0[1] = 3;
        m.file.0[2..5].copy_from_slice(b"fir");
        m.file.0[5] = 255;
        m.sname.0[0] = 15;
        m.sname.0[1] = 7;
        m.sname.0[2..9].copy_from_slice(b"example");
        m.sname.0[9] = 255;

        assert_eq!(get_option(&m, DhcpOptionKind::HostName).unwrap(), b"fir");
        assert_eq!(get_option(&m, DhcpOptionKind::DomainName).unwrap(), b"example");
    }

    #[test]
    fn test_length_validation() {
        let mut m = msg();
        // subnet must be exactly 4 bytes
        assert!(add_option(&mut m, DhcpOptionKind::SubnetMask, &[255, 255, 0]));
        let desc = option_desc(DhcpOptionKind::SubnetMask).unwrap();
        assert!(get_option_checked(&m, desc).is_none());

        // router list must be a positive multiple of 4
        let mut m = msg();
        assert!(add_option(&mut m, DhcpOptionKind::Router, &[192, 0, 2, 1, 192, 0, 2, 2]));
        let desc = option_desc(DhcpOptionKind::Router).unwrap();
        assert_eq!(get_option_checked(&m, desc).unwrap().len(), 8);

        let mut m = msg();
        assert!(add_option(&mut m, DhcpOptionKind::Router, &[192, 0, 2, 1, 7]));
        assert!(get_option_checked(&m, desc).is_none());
    }

    #[test]
    fn test_add_option_refuses_overflow() {
        let mut m = msg();
        let big = [0_u8; 255];
        assert!(add_option(&mut m, DhcpOptionKind::Message, &big));
        // 3 (type TLV) + 257 used leaves 48 free; a 50-byte value needs 53
        assert!(!add_option(&mut m, DhcpOptionKind::HostName, &big[..50]));
        // The END marker survives a refused append
        assert_eq!(get_option(&m, DhcpOptionKind::Message).unwrap().len(), 255);
    }

    #[test]
    fn test_param_request_list() {
        let mut m = msg();
        assert!(add_requests(&mut m));
        let req = get_option(&m, DhcpOptionKind::ParameterRequestList).unwrap();
        assert_eq!(req, &[1, 3, 6, 12, 15, 26, 28, 44]);
    }
}
