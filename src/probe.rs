//! The ARP prober, coupled to the DHCP state machine.
//!
//! Three probes share one mechanism and one socket:
//!
//! - a collision check on a freshly acknowledged address (success = silence,
//!   a reply means the address is taken and must be declined);
//! - a gateway check after a link bounce (success = a reply from the
//!   hardware address recorded earlier, anything else drops the lease);
//! - passive learning of the gateway's hardware address right after the
//!   first bind, which just fills in a field and goes away.
//!
//! Requests retransmit on a fixed short interval inside a bounded window;
//! what happens when the window closes depends on the probe kind.

use crate::config::ClientConfig;
use crate::dhcp::client::{self, ClientState, DhcpState};
use crate::{
    ifchd, io, sockets, sys, ArpFrame, ByteStruct, ByteStructLen, DhcpMessage, Error, IpV4Addr,
    ARP_MSG_SIZE,
};

use log::{info, warn};

/// Interval between probe retransmits, ms
pub const ARP_RETRANS_DELAY: i64 = 500;
/// Total probe window, ms
pub const ARP_PROBE_WINDOW: i64 = 2000;

/// What a probe is for, and what it needs to resolve.
pub enum ProbeKind {
    /// Verifying an acknowledged address is unclaimed before binding to it.
    /// Holds the ACK so BOUND entry can be completed from it, and the state
    /// the ACK arrived in (a collision out of REQUESTING has no interface
    /// configuration to tear down).
    Collision {
        prev_state: DhcpState,
        ack: DhcpMessage,
    },
    /// Revalidating the gateway's hardware address; restores the interrupted
    /// state and timer on success.
    GwCheck {
        prev_state: DhcpState,
        prev_timeout: i64,
    },
    /// Learning the gateway's hardware address while BOUND.
    Learn,
}

/// An in-flight probe: its purpose, target, and reply accumulation buffer.
/// The socket itself lives in the socket manager.
pub struct ArpProbe {
    pub kind: ProbeKind,
    target_ip: IpV4Addr,
    sender_ip: IpV4Addr,
    reply: [u8; ArpFrame::BYTE_LEN],
    reply_offset: usize,
    started: i64,
}

/// Open the ARP socket and send one request for `target_ip`.
fn arp_ping(cs: &mut ClientState, cfg: &ClientConfig, target_ip: IpV4Addr, sender_ip: IpV4Addr) -> Result<(), Error> {
    let fd = cs.sockets.arp_open()?;
    let frame = ArpFrame::new_probe(cfg.client_mac, sender_ip, target_ip);
    sockets::send_arp(fd, &frame.to_be_bytes(), cfg.ifindex)
}

fn resend(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let (target, sender) = match &cs.probe {
        Some(p) => (p.target_ip, p.sender_ip),
        None => return Ok(()),
    };
    let fd = match cs.sockets.arp_raw_fd() {
        Some(fd) => fd,
        None => return Ok(()),
    };
    let frame = ArpFrame::new_probe(cfg.client_mac, sender, target);
    sockets::send_arp(fd, &frame.to_be_bytes(), cfg.ifindex)
}

fn new_probe(kind: ProbeKind, target_ip: IpV4Addr, sender_ip: IpV4Addr) -> ArpProbe {
    ArpProbe {
        kind,
        target_ip,
        sender_ip,
        reply: [0_u8; ArpFrame::BYTE_LEN],
        reply_offset: 0,
        started: sys::curms(),
    }
}

/// Begin verifying the address in `ack`. On failure to even open the
/// socket, returns false and leaves the state machine untouched.
pub fn start_collision_check(cs: &mut ClientState, cfg: &ClientConfig, ack: DhcpMessage) -> bool {
    let prev_state = cs.dhcp_state;
    if let Err(e) = arp_ping(cs, cfg, ack.yiaddr, IpV4Addr::ANY) {
        warn!("arp probe setup failed: {e}");
        cs.sockets.arp_close();
        return false;
    }
    cs.probe = Some(new_probe(
        ProbeKind::Collision { prev_state, ack },
        ack.yiaddr,
        IpV4Addr::ANY,
    ));
    cs.dhcp_state = DhcpState::CollisionCheck;
    cs.timeout = ARP_RETRANS_DELAY;
    true
}

/// Begin revalidating the gateway after a link-up event.
pub fn start_gw_check(cs: &mut ClientState, cfg: &ClientConfig) -> bool {
    let prev_state = cs.dhcp_state;
    let prev_timeout = cs.timeout;
    if let Err(e) = arp_ping(cs, cfg, cs.router_addr, cs.client_addr) {
        warn!("arp probe setup failed: {e}");
        cs.sockets.arp_close();
        return false;
    }
    cs.probe = Some(new_probe(
        ProbeKind::GwCheck {
            prev_state,
            prev_timeout,
        },
        cs.router_addr,
        cs.client_addr,
    ));
    cs.dhcp_state = DhcpState::BoundGwCheck;
    cs.timeout = ARP_RETRANS_DELAY;
    true
}

/// Begin passively learning the gateway's hardware address. The state stays
/// BOUND; only the wake cadence tightens while the probe is out.
pub fn start_gw_learn(cs: &mut ClientState, cfg: &ClientConfig) -> bool {
    if cs.dhcp_state != DhcpState::Bound {
        warn!("gateway address learning requested outside of bound state");
    }
    if let Err(e) = arp_ping(cs, cfg, cs.router_addr, cs.client_addr) {
        warn!("arp probe setup failed: {e}");
        cs.sockets.arp_close();
        return false;
    }
    cs.probe = Some(new_probe(ProbeKind::Learn, cs.router_addr, cs.client_addr));
    cs.timeout = cs.timeout.min(ARP_RETRANS_DELAY);
    true
}

fn close_probe(cs: &mut ClientState) -> Option<ArpProbe> {
    cs.sockets.arp_close();
    cs.probe.take()
}

/// The probed address is free; bind to it.
fn arp_success(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let probe = match close_probe(cs) {
        Some(p) => p,
        None => return Ok(()),
    };
    match probe.kind {
        ProbeKind::Collision { ack, .. } => client::enter_bound(cs, cfg, &ack),
        _ => Ok(()),
    }
}

/// Somebody answered for the probed address; decline it and start over.
fn arp_failed(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!("Offered address is in use: declining.");
    let probe = match close_probe(cs) {
        Some(p) => p,
        None => return Ok(()),
    };
    if let ProbeKind::Collision { prev_state, ack } = probe.kind {
        client::send_decline(cs, cfg, ack.yiaddr);
        if prev_state != DhcpState::Requesting {
            ifchd::notify_deconfig(cfg)?;
        }
    }
    cs.dhcp_state = DhcpState::Selecting;
    cs.client_addr = IpV4Addr::ANY;
    cs.timeout = 0;
    cs.num_dhcp_requests = 0;
    cs.sockets.set_listen_raw()
}

/// The gateway answered from the hardware address we remembered; put the
/// interrupted state back.
fn arp_gw_success(cs: &mut ClientState) {
    info!("arp: gateway seems unchanged");
    if let Some(probe) = close_probe(cs) {
        if let ProbeKind::GwCheck {
            prev_state,
            prev_timeout,
        } = probe.kind
        {
            cs.dhcp_state = prev_state;
            cs.timeout = prev_timeout;
        }
    }
}

/// The gateway moved (or never answered); the lease is not trustworthy.
fn arp_gw_failed(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!("arp: gateway appears to have changed, getting new lease");
    close_probe(cs);
    client::reinit_selecting(cs, cfg, 0)
}

/// Timer service for the probe states (and for a pending passive learn
/// while BOUND): retransmit inside the window, resolve at its end.
pub fn arp_retransmit(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let (started, is_learn) = match &cs.probe {
        Some(p) => (p.started, matches!(p.kind, ProbeKind::Learn)),
        None => return Ok(()),
    };
    let now = sys::curms();
    let window_ends = started + ARP_PROBE_WINDOW;
    if now >= window_ends {
        return match cs.dhcp_state {
            DhcpState::CollisionCheck => arp_success(cs, cfg),
            DhcpState::BoundGwCheck => arp_gw_failed(cs, cfg),
            // Passive learn just gives up; the next link bounce will
            // force the issue
            _ => {
                close_probe(cs);
                Ok(())
            }
        };
    }
    if let Err(e) = resend(cs, cfg) {
        warn!("arp retransmit failed: {e}");
    }
    let wait = ARP_RETRANS_DELAY.min(window_ends - now);
    cs.timeout = if is_learn { cs.timeout.min(wait) } else { wait };
    Ok(())
}

/// The ARP socket is readable. Accumulate bytes until a whole frame is in,
/// then resolve or keep listening depending on whether it matches.
pub fn handle_arp_response(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let fd = match cs.sockets.arp_raw_fd() {
        Some(fd) => fd,
        None => return Ok(()),
    };

    let (matches, sender_mac) = {
        let probe = match cs.probe.as_mut() {
            Some(p) => p,
            None => {
                warn!("arp reply with no probe outstanding, closing socket");
                cs.sockets.arp_close();
                return Ok(());
            }
        };
        if probe.reply_offset < probe.reply.len() {
            let off = probe.reply_offset;
            match io::safe_read(fd, &mut probe.reply[off..]) {
                Ok(r) => probe.reply_offset += r,
                Err(e) => {
                    // Conservative responses: assume failure.
                    warn!("arp socket read failed: {e}");
                    return match cs.dhcp_state {
                        DhcpState::CollisionCheck => arp_failed(cs, cfg),
                        DhcpState::BoundGwCheck => arp_gw_failed(cs, cfg),
                        _ => {
                            close_probe(cs);
                            Ok(())
                        }
                    };
                }
            }
        }
        if probe.reply_offset < ARP_MSG_SIZE {
            warn!("Received short ARP message.");
            return Ok(());
        }
        let frame = ArpFrame::read_bytes(&probe.reply);
        (
            frame.is_reply_for(probe.target_ip, cfg.client_mac),
            frame.payload.src_mac,
        )
    };

    match cs.dhcp_state {
        DhcpState::CollisionCheck => {
            if matches {
                // A reply from our own hardware address means we answered
                // our own query, which is no conflict.
                if sender_mac == cfg.client_mac {
                    arp_success(cs, cfg)
                } else {
                    arp_failed(cs, cfg)
                }
            } else {
                reset_reply(cs);
                Ok(())
            }
        }
        DhcpState::BoundGwCheck => {
            if matches {
                if cs.router_mac == Some(sender_mac) {
                    arp_gw_success(cs);
                    Ok(())
                } else {
                    arp_gw_failed(cs, cfg)
                }
            } else {
                reset_reply(cs);
                Ok(())
            }
        }
        DhcpState::Bound => {
            if matches {
                cs.router_mac = Some(sender_mac);
                close_probe(cs);
                info!("gateway hardware address {sender_mac}");
            } else {
                info!("still looking for gateway hardware address");
                reset_reply(cs);
            }
            Ok(())
        }
        state => {
            close_probe(cs);
            warn!("arp reply handler called in invalid state {state:?}");
            Ok(())
        }
    }
}

fn reset_reply(cs: &mut ClientState) {
    if let Some(probe) = cs.probe.as_mut() {
        probe.reply = [0_u8; ArpFrame::BYTE_LEN];
        probe.reply_offset = 0;
    }
}
