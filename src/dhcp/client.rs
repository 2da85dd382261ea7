//! The DHCP client state machine.
//!
//! States follow RFC 2131 plus two of our own: COLLISION_CHECK, which holds
//! an acknowledged address while an ARP probe verifies nobody else answers
//! for it, and BOUND_GW_CHECK, which revalidates the default gateway's
//! hardware address after a link bounce.
//!
//! Events are dispatched on `(state, event)` through the exhaustive matches
//! at the bottom of this file; a state with no arm for an event ignores it.
//! Handlers run to completion before the event loop waits again, and every
//! handler takes the whole [ClientState] exclusively, so there is no shared
//! mutable state anywhere.

use crate::config::ClientConfig;
use crate::dhcp::options::{
    add_option, add_option_u16, add_requests, get_option_ip, get_option_u32, message_kind,
    DhcpOptionKind,
};
use crate::dhcp::packet::{
    assemble_raw_frame, init_packet, parse_cooked, parse_raw_frame, RAW_DHCP_FRAME_LEN,
};
use crate::dhcp::protocol::{DhcpMessage, DhcpMessageKind};
use crate::probe::{self, ArpProbe};
use crate::sockets::{self, ListenMode, SocketManager};
use crate::{ifchd, sys, Error, IpV4Addr, MacAddr};

use log::{error, info, warn};
use nix::errno::Errno;
use rand::Rng;

/// Lease assumed when the server neglects to send one, seconds
const DEFAULT_LEASE: u32 = 3600;
/// Shortest lease we will honor, seconds
const MIN_LEASE: u32 = 60;
/// Retransmit attempts for a REQUEST before falling back to discovery
const MAX_DHCP_REQUESTS: u32 = 5;
/// Unanswered discovers of the initial cycle before background/abort
const INIT_DISCOVER_TRIES: u32 = 3;
/// Cooldown after a NAK, milliseconds
const NAK_COOLDOWN: i64 = 3000;

/// The RFC 2131 states, plus the two ARP-probe states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    BoundGwCheck,
    CollisionCheck,
    Released,
}

/// All mutable daemon state, threaded by exclusive reference through the
/// event handlers. Constructed once in `main`.
pub struct ClientState {
    pub dhcp_state: DhcpState,
    /// True until the first lease is obtained
    pub init: bool,
    /// Whether we already forked to the background
    pub detached: bool,
    /// Set by a handler to wind down the event loop with this exit code
    pub exit_code: Option<i32>,
    /// Transaction id, fixed from first discover through ACK
    pub xid: u32,
    /// Address we hold or are negotiating for
    pub client_addr: IpV4Addr,
    /// Server the lease came from
    pub server_addr: IpV4Addr,
    /// Lease duration, seconds
    pub lease: u32,
    /// T1, seconds
    pub renew_time: u32,
    /// T2, seconds
    pub rebind_time: u32,
    /// Monotonic ms at which the current lease began
    pub lease_start: i64,
    /// Default gateway from the lease
    pub router_addr: IpV4Addr,
    /// Gateway hardware address, once learned
    pub router_mac: Option<MacAddr>,
    /// Next deadline in relative ms; -1 means no deadline
    pub timeout: i64,
    /// Retransmit counter for the current discover/request burst
    pub num_dhcp_requests: u32,
    pub sockets: SocketManager,
    /// In-flight ARP probe, if any
    pub probe: Option<ArpProbe>,
}

impl ClientState {
    pub fn new(sockets: SocketManager) -> Self {
        ClientState {
            dhcp_state: DhcpState::Selecting,
            init: true,
            detached: false,
            exit_code: None,
            xid: 0,
            client_addr: IpV4Addr::ANY,
            server_addr: IpV4Addr::ANY,
            lease: 0,
            renew_time: 0,
            rebind_time: 0,
            lease_start: 0,
            router_addr: IpV4Addr::ANY,
            router_mac: None,
            timeout: 0,
            num_dhcp_requests: 0,
            sockets,
            probe: None,
        }
    }
}

/// Fresh 32-bit transaction id
pub fn random_xid() -> u32 {
    rand::thread_rng().gen()
}

/// Retransmit delay for the nth packet of a burst: a doubling schedule
/// capped at 64 s, jittered by up to a second so colliding clients spread out.
fn delay_timeout(num_packets: u32) -> i64 {
    const SCHEDULE: [i64; 5] = [4, 8, 16, 32, 64];
    let to = SCHEDULE
        .get(num_packets as usize)
        .copied()
        .unwrap_or(SCHEDULE[SCHEDULE.len() - 1]);
    to * 1000 + rand::thread_rng().gen_range(0..1000)
}

/// Lease duration from an ACK: high bit masked so the ms conversion cannot
/// overflow, floored at one minute, defaulted when absent.
pub fn lease_seconds(msg: &DhcpMessage) -> u32 {
    match get_option_u32(msg, DhcpOptionKind::IpAddressLeaseTime) {
        None => {
            info!("No lease time received, assuming 1h.");
            DEFAULT_LEASE
        }
        Some(raw) => {
            let lease = raw & 0x7fff_ffff;
            if lease < MIN_LEASE {
                warn!("Server sent lease of <1m.  Forcing lease to 1m.");
                MIN_LEASE
            } else {
                lease
            }
        }
    }
}

/// RFC 2131 default timers: T1 = lease/2, T2 = lease * 7/8.
pub fn renew_rebind_times(lease: u32) -> (u32, u32) {
    (lease >> 1, ((lease as u64 * 7) >> 3) as u32)
}

/// Abandon whatever we were doing and start a fresh discovery after
/// `timeout` ms: deconfigure, drop the probe, reopen the raw socket.
pub fn reinit_selecting(cs: &mut ClientState, cfg: &ClientConfig, timeout: i64) -> Result<(), Error> {
    ifchd::notify_deconfig(cfg)?;
    cs.sockets.arp_close();
    cs.probe = None;
    cs.dhcp_state = DhcpState::Selecting;
    cs.timeout = timeout;
    cs.client_addr = IpV4Addr::ANY;
    cs.num_dhcp_requests = 0;
    cs.sockets.set_listen_raw()
}

fn set_released(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    ifchd::notify_deconfig(cfg)?;
    cs.sockets.arp_close();
    cs.probe = None;
    cs.dhcp_state = DhcpState::Released;
    cs.timeout = -1;
    cs.client_addr = IpV4Addr::ANY;
    cs.num_dhcp_requests = 0;
    cs.sockets.set_listen_none();
    Ok(())
}

/// Fork to the background (once) and record our pid.
pub fn background(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    if !cs.detached {
        sys::daemonize()?;
        cs.detached = true;
    }
    sys::write_pid(&cfg.pidfile)
}

/// Take up residence on an acknowledged address: start the T1 clock, tell
/// the configurator, close the listen socket, and kick off passive learning
/// of the gateway's hardware address if we do not know it yet.
pub fn enter_bound(cs: &mut ClientState, cfg: &ClientConfig, ack: &DhcpMessage) -> Result<(), Error> {
    cs.timeout = cs.renew_time as i64 * 1000;
    cs.client_addr = ack.yiaddr;
    cs.init = false;
    info!("Lease of {} obtained, lease time {}.", ack.yiaddr, cs.lease);
    cs.dhcp_state = DhcpState::Bound;

    ifchd::notify_bound(cfg, ack)?;
    cs.sockets.set_listen_none();

    if let Some(router) = get_option_ip(ack, DhcpOptionKind::Router) {
        if router != cs.router_addr {
            cs.router_mac = None;
        }
        cs.router_addr = router;
        if cs.router_mac.is_none() {
            probe::start_gw_learn(cs, cfg);
        }
    }

    if cfg.quit_after_lease {
        cs.exit_code = Some(0);
        return Ok(());
    }
    if !cfg.foreground {
        background(cs, cfg)?;
    }
    Ok(())
}

// ---- outbound messages -------------------------------------------------

fn client_packet(cs: &ClientState, cfg: &ClientConfig, kind: DhcpMessageKind) -> DhcpMessage {
    init_packet(
        kind,
        cs.xid,
        cfg.client_mac,
        &cfg.client_id,
        cfg.hostname.as_deref(),
    )
}

fn broadcast(frame: &[u8], cfg: &ClientConfig) {
    if let Err(e) = sockets::send_raw_broadcast(frame, cfg.ifindex) {
        warn!("raw broadcast send failed: {e}");
    }
}

fn unicast(payload: &[u8], src: IpV4Addr, dst: IpV4Addr) {
    if let Err(e) = sockets::send_udp_unicast(payload, src, dst) {
        warn!("unicast send to {dst} failed: {e}");
    }
}

/// Broadcast a DHCP discover, with an optionally requested IP
fn send_discover(cs: &ClientState, cfg: &ClientConfig) {
    let mut msg = client_packet(cs, cfg, DhcpMessageKind::Discover);
    let requested = if cs.client_addr != IpV4Addr::ANY {
        Some(cs.client_addr)
    } else {
        cfg.request_ip
    };
    if let Some(ip) = requested {
        add_option(&mut msg, DhcpOptionKind::RequestedIpAddress, &ip.0);
    }
    add_option_u16(&mut msg, DhcpOptionKind::MaxDhcpMessageSize, RAW_DHCP_FRAME_LEN as u16);
    add_requests(&mut msg);
    info!("Sending discover...");
    broadcast(&assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST), cfg);
}

/// Broadcast the REQUEST that accepts an offer
fn send_selecting(cs: &ClientState, cfg: &ClientConfig) {
    let mut msg = client_packet(cs, cfg, DhcpMessageKind::Request);
    add_option(&mut msg, DhcpOptionKind::RequestedIpAddress, &cs.client_addr.0);
    add_option(&mut msg, DhcpOptionKind::ServerIdentifier, &cs.server_addr.0);
    add_requests(&mut msg);
    info!("Sending select for {}...", cs.client_addr);
    broadcast(&assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST), cfg);
}

/// Unicast a renewal straight to the leasing server
fn send_renew(cs: &ClientState, cfg: &ClientConfig) {
    let mut msg = client_packet(cs, cfg, DhcpMessageKind::Request);
    msg.ciaddr = cs.client_addr;
    add_requests(&mut msg);
    info!("Sending renew...");
    unicast(&msg.to_be_bytes(), cs.client_addr, cs.server_addr);
}

/// Broadcast a renewal once the leasing server has stopped answering
fn send_rebind(cs: &ClientState, cfg: &ClientConfig) {
    let mut msg = client_packet(cs, cfg, DhcpMessageKind::Request);
    msg.ciaddr = cs.client_addr;
    add_requests(&mut msg);
    info!("Sending rebind...");
    broadcast(&assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST), cfg);
}

/// Unicast a release. Releases are a negotiation of their own, so they
/// draw a fresh xid.
fn send_release(cs: &ClientState, cfg: &ClientConfig) {
    let mut msg = init_packet(
        DhcpMessageKind::Release,
        random_xid(),
        cfg.client_mac,
        &cfg.client_id,
        cfg.hostname.as_deref(),
    );
    msg.ciaddr = cs.client_addr;
    add_option(&mut msg, DhcpOptionKind::RequestedIpAddress, &cs.client_addr.0);
    add_option(&mut msg, DhcpOptionKind::ServerIdentifier, &cs.server_addr.0);
    info!("Sending release...");
    unicast(&msg.to_be_bytes(), cs.client_addr, cs.server_addr);
}

/// Broadcast a decline of an address the collision probe found in use
pub fn send_decline(cs: &ClientState, cfg: &ClientConfig, declined: IpV4Addr) {
    let mut msg = client_packet(cs, cfg, DhcpMessageKind::Decline);
    add_option(&mut msg, DhcpOptionKind::RequestedIpAddress, &declined.0);
    add_option(&mut msg, DhcpOptionKind::ServerIdentifier, &cs.server_addr.0);
    info!("Sending decline of {declined}...");
    broadcast(&assemble_raw_frame(&msg, IpV4Addr::ANY, IpV4Addr::BROADCAST), cfg);
}

// ---- per-state handlers ------------------------------------------------

// A discover went unanswered. Retransmit on the backoff schedule; once the
// initial cycle has clearly failed, background or abort as configured.
fn selecting_timeout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    if cs.init && cs.num_dhcp_requests >= INIT_DISCOVER_TRIES {
        if cfg.background_if_no_lease {
            info!("No lease, going to background.");
            cs.init = false;
            background(cs, cfg)?;
        } else if cfg.abort_if_no_lease {
            info!("No lease, failing.");
            cs.exit_code = Some(1);
            return Ok(());
        }
    }
    if cs.num_dhcp_requests == 0 {
        cs.xid = random_xid();
    }
    send_discover(cs, cfg);
    cs.timeout = delay_timeout(cs.num_dhcp_requests);
    cs.num_dhcp_requests += 1;
    Ok(())
}

// A lease request went unanswered. Retransmit a bounded number of times,
// then return to the discovery state.
fn requesting_timeout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    if cs.num_dhcp_requests < MAX_DHCP_REQUESTS {
        send_selecting(cs, cfg);
        cs.timeout = delay_timeout(cs.num_dhcp_requests);
        cs.num_dhcp_requests += 1;
        Ok(())
    } else {
        reinit_selecting(cs, cfg, 0)
    }
}

// The lease has been held for a significant fraction of its total time;
// move to renewing. Also paces the passive gateway-MAC probe.
fn bound_timeout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    probe::arp_retransmit(cs, cfg)?;

    let now = sys::curms();
    let renew_at = cs.lease_start + cs.renew_time as i64 * 1000;
    if now < renew_at {
        if cs.probe.is_none() {
            cs.timeout = renew_at - now;
        }
        return Ok(());
    }
    cs.dhcp_state = DhcpState::Renewing;
    cs.sockets.set_listen_cooked()?;
    info!("Entering renew state.");
    renewing_timeout(cs, cfg)
}

fn lease_timedout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!("Lease lost, entering init state.");
    reinit_selecting(cs, cfg, 0)
}

// While the lease is still before T2, unicast renewals at a halving
// interval (but not more often than every 30 s). Past T2, rebind.
fn renewing_timeout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let now = sys::curms();
    let rebind_at = cs.lease_start + cs.rebind_time as i64 * 1000;
    if now < rebind_at {
        let mut wait = (rebind_at - now) / 2;
        if wait >= 30_000 {
            send_renew(cs, cfg);
        } else {
            wait = rebind_at - now;
        }
        cs.timeout = wait;
        return Ok(());
    }
    let expiry = cs.lease_start + cs.lease as i64 * 1000;
    if now < expiry {
        cs.dhcp_state = DhcpState::Rebinding;
        cs.timeout = (expiry - now) / 2;
        info!("Entering rebinding state.");
        Ok(())
    } else {
        lease_timedout(cs, cfg)
    }
}

// Broadcast renewals until the lease itself runs out.
fn rebinding_timeout(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let now = sys::curms();
    let expiry = cs.lease_start + cs.lease as i64 * 1000;
    if now < expiry {
        let mut wait = (expiry - now) / 2;
        if wait >= 30_000 {
            send_rebind(cs, cfg);
        } else {
            wait = expiry - now;
        }
        cs.timeout = wait;
        Ok(())
    } else {
        lease_timedout(cs, cfg)
    }
}

fn released_timeout(cs: &mut ClientState) {
    cs.timeout = -1;
}

// An OFFER chooses our server; anything else in SELECTING is ignored.
fn selecting_packet(cs: &mut ClientState, msg: &DhcpMessage, kind: DhcpMessageKind) {
    if kind != DhcpMessageKind::Offer {
        return;
    }
    match get_option_ip(msg, DhcpOptionKind::ServerIdentifier) {
        Some(server) => {
            cs.server_addr = server;
            cs.xid = msg.xid;
            cs.client_addr = msg.yiaddr;
            cs.dhcp_state = DhcpState::Requesting;
            cs.timeout = 0;
            cs.num_dhcp_requests = 0;
        }
        None => info!("No server ID in message"),
    }
}

// ACK or NAK while REQUESTING / RENEWING / REBINDING.
// Can transition to COLLISION_CHECK, BOUND, or SELECTING.
fn an_packet(
    cs: &mut ClientState,
    cfg: &ClientConfig,
    msg: &DhcpMessage,
    kind: DhcpMessageKind,
) -> Result<(), Error> {
    match kind {
        DhcpMessageKind::Ack => {
            cs.lease_start = sys::curms();
            cs.lease = lease_seconds(msg);
            (cs.renew_time, cs.rebind_time) = renew_rebind_times(cs.lease);

            // Only probe when the address is new to us: always out of
            // REQUESTING, and on renewal only if the server moved us.
            if cs.dhcp_state == DhcpState::Requesting || msg.yiaddr != cs.client_addr {
                if !probe::start_collision_check(cs, cfg, *msg) {
                    warn!("failed to make arp socket, retrying lease");
                    reinit_selecting(cs, cfg, NAK_COOLDOWN)?;
                }
            } else {
                enter_bound(cs, cfg, msg)?;
            }
            Ok(())
        }
        DhcpMessageKind::Nak => {
            info!("Received DHCP NAK.");
            reinit_selecting(cs, cfg, NAK_COOLDOWN)
        }
        _ => Ok(()),
    }
}

fn xmit_release(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!(
        "Unicasting a release of {} to {}.",
        cs.client_addr, cs.server_addr
    );
    send_release(cs, cfg);
    print_release(cs, cfg)
}

fn print_release(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!("Entering released state.");
    set_released(cs, cfg)
}

fn frenew(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Bound => {
            info!("Forcing a DHCP renew...");
            cs.dhcp_state = DhcpState::Renewing;
            cs.sockets.set_listen_cooked()?;
            send_renew(cs, cfg);
            Ok(())
        }
        DhcpState::Released => reinit_selecting(cs, cfg, 0),
        _ => Ok(()),
    }
}

// ---- event dispatch ----------------------------------------------------

/// A validated server message addressed to our xid.
pub fn packet_action(
    cs: &mut ClientState,
    cfg: &ClientConfig,
    msg: &DhcpMessage,
    kind: DhcpMessageKind,
) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Selecting => {
            selecting_packet(cs, msg, kind);
            Ok(())
        }
        DhcpState::Requesting | DhcpState::Renewing | DhcpState::Rebinding => {
            an_packet(cs, cfg, msg, kind)
        }
        // Probe states resolve via the ARP socket, not DHCP traffic
        DhcpState::Bound
        | DhcpState::BoundGwCheck
        | DhcpState::CollisionCheck
        | DhcpState::Released => Ok(()),
    }
}

/// The timer ran down.
pub fn timeout_action(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Selecting => selecting_timeout(cs, cfg),
        DhcpState::Requesting => requesting_timeout(cs, cfg),
        DhcpState::Bound => bound_timeout(cs, cfg),
        DhcpState::Renewing => renewing_timeout(cs, cfg),
        DhcpState::Rebinding => rebinding_timeout(cs, cfg),
        DhcpState::BoundGwCheck | DhcpState::CollisionCheck => probe::arp_retransmit(cs, cfg),
        DhcpState::Released => {
            released_timeout(cs);
            Ok(())
        }
    }
}

/// SIGUSR1: renew now.
pub fn force_renew_action(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Bound | DhcpState::Released => frenew(cs, cfg),
        _ => Ok(()),
    }
}

/// SIGUSR2: give the lease back.
pub fn force_release_action(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Selecting | DhcpState::Requesting => print_release(cs, cfg),
        DhcpState::Bound
        | DhcpState::Renewing
        | DhcpState::Rebinding
        | DhcpState::BoundGwCheck
        | DhcpState::CollisionCheck => xmit_release(cs, cfg),
        DhcpState::Released => Ok(()),
    }
}

/// The interface came back up. Revalidate the gateway if we hold a lease,
/// otherwise start over.
pub fn ifup_action(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    match cs.dhcp_state {
        DhcpState::Bound | DhcpState::Renewing | DhcpState::Rebinding => {
            if probe::start_gw_check(cs, cfg) {
                info!("nl: interface back, revalidating lease");
            } else {
                warn!("nl: arp_gw_check could not make arp socket, assuming lease is still OK");
            }
            Ok(())
        }
        DhcpState::Selecting => Ok(()),
        _ => {
            info!("nl: {} back, querying for new lease", cfg.interface);
            reinit_selecting(cs, cfg, 0)
        }
    }
}

/// The interface was taken down; sleep until it returns.
pub fn ifdown_action(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    info!("Interface shut down.  Going to sleep.");
    set_released(cs, cfg)
}

/// Carrier dropped but the interface stayed up; nothing to do yet.
pub fn ifnocarrier_action(_cs: &mut ClientState, _cfg: &ClientConfig) {
    info!("Interface carrier down.");
}

/// The listen socket is readable: pull one frame, validate it, and hand it
/// to the state machine if it survives.
pub fn handle_packet(cs: &mut ClientState, cfg: &ClientConfig) -> Result<(), Error> {
    let mode = cs.sockets.mode();
    let fd = match cs.sockets.listen_raw_fd() {
        Some(fd) => fd,
        None => return Ok(()),
    };

    let mut buf = [0_u8; RAW_DHCP_FRAME_LEN];
    let len = match nix::unistd::read(fd, &mut buf) {
        Ok(n) => n,
        Err(Errno::EINTR) | Err(Errno::EAGAIN) => return Ok(()),
        Err(e) => {
            error!("error on listen socket read ({e}), reopening socket");
            return match mode {
                ListenMode::Raw => cs.sockets.set_listen_raw(),
                ListenMode::Cooked => cs.sockets.set_listen_cooked(),
                ListenMode::None => Ok(()),
            };
        }
    };

    let parsed = match mode {
        ListenMode::Raw => parse_raw_frame(&buf[..len]),
        ListenMode::Cooked => parse_cooked(&buf[..len]),
        ListenMode::None => return Ok(()),
    };
    let msg = match parsed {
        Ok(msg) => msg,
        Err(reject) => {
            info!("{reject}, ignoring");
            return Ok(());
        }
    };

    if msg.xid != cs.xid {
        info!("Ignoring XID {:x} (our xid is {:x}).", msg.xid, cs.xid);
        return Ok(());
    }
    let kind = match message_kind(&msg) {
        Some(kind) => kind,
        None => {
            info!("couldn't get option from packet -- ignoring");
            return Ok(());
        }
    };
    packet_action(cs, cfg, &msg, kind)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::options::{add_option, add_option_u32};

    fn state() -> ClientState {
        ClientState::new(SocketManager::new(1).unwrap())
    }

    fn cfg_with_sock(path: &str) -> ClientConfig {
        ClientConfig {
            ifchd_sock: path.to_string(),
            ..ClientConfig::default()
        }
    }

    fn offer(xid: u32, yiaddr: [u8; 4], server: [u8; 4]) -> DhcpMessage {
        let mut msg = DhcpMessage::new(
            DhcpMessageKind::Offer,
            xid,
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
        );
        msg.op = crate::DhcpOperation::Reply;
        msg.yiaddr = IpV4Addr::new(yiaddr);
        add_option(&mut msg, DhcpOptionKind::ServerIdentifier, &server);
        msg
    }

    #[test]
    fn test_timer_math() {
        assert_eq!(renew_rebind_times(3600), (1800, 3150));
        assert_eq!(renew_rebind_times(120), (60, 105));
        // Masked leases still divide cleanly
        let (t1, t2) = renew_rebind_times(0x7fff_ffff);
        assert!(t1 <= t2 && t2 <= 0x7fff_ffff);
    }

    #[test]
    fn test_lease_seconds_bounds() {
        let mut msg = offer(1, [0; 4], [192, 0, 2, 1]);
        assert_eq!(lease_seconds(&msg), DEFAULT_LEASE);

        add_option_u32(&mut msg, DhcpOptionKind::IpAddressLeaseTime, 30);
        assert_eq!(lease_seconds(&msg), MIN_LEASE);

        let mut msg = offer(1, [0; 4], [192, 0, 2, 1]);
        add_option_u32(&mut msg, DhcpOptionKind::IpAddressLeaseTime, 0x8000_0E10);
        assert_eq!(lease_seconds(&msg), 0x0E10);

        let mut msg = offer(1, [0; 4], [192, 0, 2, 1]);
        add_option_u32(&mut msg, DhcpOptionKind::IpAddressLeaseTime, 86400);
        assert_eq!(lease_seconds(&msg), 86400);
    }

    #[test]
    fn test_delay_schedule() {
        for (n, base) in [(0, 4000), (1, 8000), (2, 16000), (3, 32000), (4, 64000), (9, 64000)] {
            for _ in 0..8 {
                let d = delay_timeout(n);
                assert!(d >= base && d < base + 1000, "try {n}: {d}");
            }
        }
    }

    #[test]
    fn test_offer_moves_to_requesting() {
        let mut cs = state();
        let cfg = ClientConfig::default();
        cs.dhcp_state = DhcpState::Selecting;
        cs.xid = 0x11223344;
        cs.timeout = 4000;

        let msg = offer(0x11223344, [192, 0, 2, 10], [192, 0, 2, 1]);
        packet_action(&mut cs, &cfg, &msg, DhcpMessageKind::Offer).unwrap();

        assert_eq!(cs.dhcp_state, DhcpState::Requesting);
        assert_eq!(cs.server_addr, IpV4Addr::new([192, 0, 2, 1]));
        assert_eq!(cs.client_addr, IpV4Addr::new([192, 0, 2, 10]));
        assert_eq!(cs.timeout, 0);
        assert_eq!(cs.num_dhcp_requests, 0);
    }

    #[test]
    fn test_offer_without_server_id_ignored() {
        let mut cs = state();
        let cfg = ClientConfig::default();
        cs.dhcp_state = DhcpState::Selecting;

        let mut msg = DhcpMessage::new(
            DhcpMessageKind::Offer,
            1,
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
        );
        msg.yiaddr = IpV4Addr::new([192, 0, 2, 10]);
        packet_action(&mut cs, &cfg, &msg, DhcpMessageKind::Offer).unwrap();
        assert_eq!(cs.dhcp_state, DhcpState::Selecting);
    }

    #[test]
    fn test_offer_in_probe_states_ignored() {
        let mut cs = state();
        let cfg = ClientConfig::default();
        let msg = offer(1, [192, 0, 2, 10], [192, 0, 2, 1]);
        for st in [DhcpState::CollisionCheck, DhcpState::BoundGwCheck, DhcpState::Released] {
            cs.dhcp_state = st;
            packet_action(&mut cs, &cfg, &msg, DhcpMessageKind::Offer).unwrap();
            assert_eq!(cs.dhcp_state, st);
        }
    }

    #[test]
    fn test_force_release_from_selecting() {
        // print_release path: no packet is sent, but the configurator is
        // told to deconfigure and the machine parks in RELEASED
        let dir = std::env::temp_dir().join(format!("ndhc-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock = dir.join("ifchange");
        let _ = std::fs::remove_file(&sock);
        let listener = std::os::unix::net::UnixListener::bind(&sock).unwrap();

        let handle = std::thread::spawn(move || {
            use std::io::Read;
            let (mut stream, _) = listener.accept().unwrap();
            let mut got = String::new();
            stream.read_to_string(&mut got).unwrap();
            got
        });

        let mut cs = state();
        let cfg = cfg_with_sock(sock.to_str().unwrap());
        cs.dhcp_state = DhcpState::Selecting;
        force_release_action(&mut cs, &cfg).unwrap();

        assert_eq!(cs.dhcp_state, DhcpState::Released);
        assert_eq!(cs.timeout, -1);
        assert_eq!(cs.client_addr, IpV4Addr::ANY);

        let got = handle.join().unwrap();
        assert_eq!(got, "interface:eth0:ip:0.0.0.0:");
        let _ = std::fs::remove_file(&sock);
    }

    #[test]
    fn test_released_timeout_sleeps_forever() {
        let mut cs = state();
        let cfg = ClientConfig::default();
        cs.dhcp_state = DhcpState::Released;
        cs.timeout = 0;
        timeout_action(&mut cs, &cfg).unwrap();
        assert_eq!(cs.timeout, -1);
    }
}
