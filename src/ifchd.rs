//! Client side of the interface-change daemon protocol.
//!
//! Lease results are applied by a separate privileged process (`ifchd`)
//! reached over a local stream socket. Commands are colon-framed ASCII
//! records, `key:value[:value...]:`, and a connection is one-shot: open,
//! write the records, close. The receiver must not rely on record
//! boundaries surviving the stream.

use crate::config::ClientConfig;
use crate::dhcp::options::{get_option_checked, option_desc, OptionType};
use crate::dhcp::protocol::{DhcpMessage, DhcpOptionKind};
use crate::{Error, IpV4Addr};

use log::{error, info};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

/// Options forwarded to the configurator after a bind, in this order.
const TRANSLATED: [DhcpOptionKind; 8] = [
    DhcpOptionKind::SubnetMask,
    DhcpOptionKind::Router,
    DhcpOptionKind::DomainNameServers,
    DhcpOptionKind::HostName,
    DhcpOptionKind::DomainName,
    DhcpOptionKind::InterfaceMtu,
    DhcpOptionKind::BroadcastAddress,
    DhcpOptionKind::WinsServers,
];

/// Serialize one option into its `name:value[:value...]:` record.
/// Returns None when the option is absent or fails length validation.
fn translate_option(msg: &DhcpMessage, code: DhcpOptionKind) -> Option<String> {
    let desc = option_desc(code)?;
    let data = get_option_checked(msg, desc)?;

    let mut values: Vec<String> = Vec::new();
    match desc.kind {
        OptionType::Str => values.push(String::from_utf8_lossy(data).into_owned()),
        OptionType::Ip => {
            for chunk in data.chunks_exact(4) {
                values.push(IpV4Addr::new([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string());
            }
        }
        OptionType::U8 => {
            for v in data {
                values.push(v.to_string());
            }
        }
        OptionType::U16 => {
            for chunk in data.chunks_exact(2) {
                values.push(u16::from_be_bytes([chunk[0], chunk[1]]).to_string());
            }
        }
        OptionType::S16 => {
            for chunk in data.chunks_exact(2) {
                values.push(i16::from_be_bytes([chunk[0], chunk[1]]).to_string());
            }
        }
        OptionType::U32 => {
            for chunk in data.chunks_exact(4) {
                values.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string());
            }
        }
        OptionType::S32 => {
            for chunk in data.chunks_exact(4) {
                values.push(i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string());
            }
        }
    }

    Some(format!("{}:{}:", desc.name, values.join(":")))
}

/// The records announcing a fresh or renewed lease.
pub fn bound_records(interface: &str, msg: &DhcpMessage) -> Vec<String> {
    let mut records = vec![
        format!("interface:{interface}:"),
        format!("ip:{}:", msg.yiaddr),
    ];
    for code in TRANSLATED {
        if let Some(record) = translate_option(msg, code) {
            records.push(record);
        }
    }
    records
}

/// The records tearing interface configuration back down.
pub fn deconfig_records(interface: &str) -> Vec<String> {
    vec![format!("interface:{interface}:"), "ip:0.0.0.0:".to_string()]
}

fn open_ifch(cfg: &ClientConfig) -> Result<UnixStream, Error> {
    // A lease we cannot apply is useless, so failure here is fatal
    UnixStream::connect(&cfg.ifchd_sock).map_err(Error::Ifchd)
}

fn write_records(stream: UnixStream, records: &[String]) {
    for record in records {
        match crate::io::safe_write(stream.as_fd(), record.as_bytes()) {
            Ok(_) => info!("sent to ifchd: {record}"),
            Err(e) => error!("ifchd write failed: {e}"),
        }
    }
}

/// Push a bound/renewed lease to the configurator.
pub fn notify_bound(cfg: &ClientConfig, msg: &DhcpMessage) -> Result<(), Error> {
    let stream = open_ifch(cfg)?;
    write_records(stream, &bound_records(&cfg.interface, msg));
    Ok(())
}

/// Tell the configurator to clear the interface.
pub fn notify_deconfig(cfg: &ClientConfig) -> Result<(), Error> {
    let stream = open_ifch(cfg)?;
    write_records(stream, &deconfig_records(&cfg.interface));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::options::add_option;
    use crate::dhcp::protocol::DhcpMessage;
    use crate::dhcp::DhcpMessageKind;
    use crate::MacAddr;

    fn ack() -> DhcpMessage {
        let mut msg = DhcpMessage::new(
            DhcpMessageKind::Ack,
            0x11223344,
            MacAddr::new([2, 0, 0, 0, 0, 1]),
        );
        msg.yiaddr = IpV4Addr::new([192, 0, 2, 10]);
        msg
    }

    #[test]
    fn test_bound_records() {
        let mut msg = ack();
        add_option(&mut msg, DhcpOptionKind::SubnetMask, &[255, 255, 255, 0]);
        add_option(&mut msg, DhcpOptionKind::Router, &[192, 0, 2, 1]);
        add_option(
            &mut msg,
            DhcpOptionKind::DomainNameServers,
            &[192, 0, 2, 1, 192, 0, 2, 2],
        );
        add_option(&mut msg, DhcpOptionKind::DomainName, b"example.net");
        add_option(&mut msg, DhcpOptionKind::InterfaceMtu, &1500_u16.to_be_bytes());

        let records = bound_records("eth0", &msg);
        assert_eq!(
            records,
            vec![
                "interface:eth0:",
                "ip:192.0.2.10:",
                "subnet:255.255.255.0:",
                "router:192.0.2.1:",
                "dns:192.0.2.1:192.0.2.2:",
                "domain:example.net:",
                "mtu:1500:",
            ]
        );
    }

    #[test]
    fn test_bad_length_option_skipped() {
        let mut msg = ack();
        // A 3-byte subnet mask fails validation and is left out entirely
        add_option(&mut msg, DhcpOptionKind::SubnetMask, &[255, 255, 0]);
        let records = bound_records("eth0", &msg);
        assert_eq!(records, vec!["interface:eth0:", "ip:192.0.2.10:"]);
    }

    #[test]
    fn test_deconfig_records() {
        assert_eq!(
            deconfig_records("eth0"),
            vec!["interface:eth0:", "ip:0.0.0.0:"]
        );
    }
}
