//! Socket manager: owns the single DHCP listen socket (raw pre-binding,
//! cooked once an address is configured) and the ARP socket, and keeps the
//! epoll readiness set in step with them.
//!
//! Outbound sends use short-lived sockets opened per packet; only the listen
//! side has lifecycle tied to the state machine.

use crate::dhcp::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::{io, Error, IpV4Addr};

use log::info;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use nix::sys::socket::{
    bind, connect, send, setsockopt, socket, sockopt, AddressFamily, MsgFlags, SockFlag, SockType,
    SockaddrIn,
};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Which kind of DHCP listen socket is currently open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    None,
    Cooked,
    Raw,
}

/// Holder of the daemon's long-lived fds. Dropping a socket closes it; every
/// close goes through here so the epoll set never holds a stale fd.
pub struct SocketManager {
    epoll: Epoll,
    ifindex: i32,
    mode: ListenMode,
    listen: Option<OwnedFd>,
    arp: Option<OwnedFd>,
}

impl SocketManager {
    pub fn new(ifindex: i32) -> Result<Self, Error> {
        Ok(SocketManager {
            epoll: Epoll::new(EpollCreateFlags::empty())?,
            ifindex,
            mode: ListenMode::None,
            listen: None,
            arp: None,
        })
    }

    /// Add an externally owned fd (the signal fd) to the readiness set.
    pub fn register_external(&self, fd: RawFd) {
        self.register(fd);
    }

    /// Block until an owned fd is ready or `timeout_ms` elapses (-1 blocks
    /// indefinitely). Returns the number of events filled in.
    pub fn wait(&self, events: &mut [EpollEvent], timeout_ms: i64) -> nix::Result<usize> {
        let timeout = if timeout_ms < 0 {
            -1_isize
        } else {
            timeout_ms.min(isize::MAX as i64) as isize
        };
        self.epoll.wait(events, timeout)
    }

    pub fn mode(&self) -> ListenMode {
        self.mode
    }

    pub fn listen_raw_fd(&self) -> Option<RawFd> {
        self.listen.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn arp_raw_fd(&self) -> Option<RawFd> {
        self.arp.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Close any DHCP listen socket and open a raw packet socket bound to
    /// the interface.
    pub fn set_listen_raw(&mut self) -> Result<(), Error> {
        self.close_listen();
        let fd = raw_listen_socket(self.ifindex)?;
        self.register(fd.as_raw_fd());
        self.listen = Some(fd);
        self.mode = ListenMode::Raw;
        info!("entering raw listen mode");
        Ok(())
    }

    /// Close any DHCP listen socket and open a UDP socket bound to
    /// 0.0.0.0:68.
    pub fn set_listen_cooked(&mut self) -> Result<(), Error> {
        self.close_listen();
        let fd = cooked_listen_socket()?;
        self.register(fd.as_raw_fd());
        self.listen = Some(fd);
        self.mode = ListenMode::Cooked;
        info!("entering cooked listen mode");
        Ok(())
    }

    /// Close any DHCP listen socket.
    pub fn set_listen_none(&mut self) {
        self.close_listen();
        self.mode = ListenMode::None;
        info!("entering none listen mode");
    }

    /// Open the ARP socket, replacing any previous one. Returns the raw fd
    /// for the send that follows.
    pub fn arp_open(&mut self) -> Result<RawFd, Error> {
        self.arp_close();
        let fd = arp_socket(self.ifindex)?;
        self.register(fd.as_raw_fd());
        let raw = fd.as_raw_fd();
        self.arp = Some(fd);
        Ok(raw)
    }

    /// Close the ARP socket if one is open.
    pub fn arp_close(&mut self) {
        if let Some(fd) = self.arp.take() {
            self.deregister(fd.as_raw_fd());
        }
    }

    fn close_listen(&mut self) {
        if let Some(fd) = self.listen.take() {
            self.deregister(fd.as_raw_fd());
        }
    }

    // Registration failures mean our fd bookkeeping is wrong, which is not
    // a state the daemon can continue from.
    fn register(&self, fd: RawFd) {
        let event = EpollEvent::new(
            EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP,
            fd as u64,
        );
        self.epoll
            .add(unsafe { BorrowedFd::borrow_raw(fd) }, event)
            .expect("epoll add failed");
    }

    fn deregister(&self, fd: RawFd) {
        self.epoll
            .delete(unsafe { BorrowedFd::borrow_raw(fd) })
            .expect("epoll delete failed");
    }
}

fn set_nonblock(fd: RawFd) -> Result<(), Error> {
    fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    Ok(())
}

fn htons(v: u16) -> u16 {
    v.to_be()
}

fn link_addr(ifindex: i32, protocol: u16) -> libc::sockaddr_ll {
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
    addr.sll_protocol = htons(protocol);
    addr.sll_ifindex = ifindex;
    addr
}

/// A PF_PACKET socket for `protocol`, bound to the interface.
fn packet_socket(ifindex: i32, kind: libc::c_int, protocol: u16) -> Result<OwnedFd, Error> {
    let raw = unsafe { libc::socket(libc::AF_PACKET, kind, htons(protocol) as libc::c_int) };
    if raw < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let addr = link_addr(ifindex, protocol);
    let r = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&addr as *const libc::sockaddr_ll).cast(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if r < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(fd)
}

fn raw_listen_socket(ifindex: i32) -> Result<OwnedFd, Error> {
    let fd = packet_socket(ifindex, libc::SOCK_DGRAM, libc::ETH_P_IP as u16)?;
    set_nonblock(fd.as_raw_fd())?;
    Ok(fd)
}

fn cooked_listen_socket() -> Result<OwnedFd, Error> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    setsockopt(&fd, sockopt::Broadcast, &true)?;
    bind(fd.as_raw_fd(), &SockaddrIn::new(0, 0, 0, 0, DHCP_CLIENT_PORT))?;
    set_nonblock(fd.as_raw_fd())?;
    Ok(fd)
}

/// The ARP socket carries whole Ethernet frames, so it is SOCK_RAW rather
/// than the datagram mode the DHCP path uses.
fn arp_socket(ifindex: i32) -> Result<OwnedFd, Error> {
    let fd = packet_socket(ifindex, libc::SOCK_RAW, libc::ETH_P_ARP as u16)?;
    setsockopt(&fd, sockopt::Broadcast, &true)?;
    set_nonblock(fd.as_raw_fd())?;
    Ok(fd)
}

/// Send an assembled IP+UDP+DHCP frame to the broadcast MAC through a
/// throwaway packet socket.
pub fn send_raw_broadcast(frame: &[u8], ifindex: i32) -> Result<(), Error> {
    let fd = packet_socket(ifindex, libc::SOCK_DGRAM, libc::ETH_P_IP as u16)?;
    let mut addr = link_addr(ifindex, libc::ETH_P_IP as u16);
    addr.sll_halen = 6;
    addr.sll_addr[..6].copy_from_slice(&[0xff; 6]);
    io::safe_sendto_ll(fd.as_raw_fd(), frame, &addr)?;
    Ok(())
}

/// Send an ARP frame (Ethernet header included) on the open ARP socket.
pub fn send_arp(fd: RawFd, frame: &[u8], ifindex: i32) -> Result<(), Error> {
    let mut addr = link_addr(ifindex, libc::ETH_P_ARP as u16);
    addr.sll_halen = 6;
    addr.sll_addr[..6].copy_from_slice(&[0xff; 6]);
    io::safe_sendto_ll(fd, frame, &addr)?;
    Ok(())
}

/// Unicast a DHCP payload from our bound address straight to the server
/// through a throwaway UDP socket.
pub fn send_udp_unicast(payload: &[u8], src: IpV4Addr, dst: IpV4Addr) -> Result<(), Error> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    let [a, b, c, d] = src.0;
    bind(fd.as_raw_fd(), &SockaddrIn::new(a, b, c, d, DHCP_CLIENT_PORT))?;
    let [a, b, c, d] = dst.0;
    connect(fd.as_raw_fd(), &SockaddrIn::new(a, b, c, d, DHCP_SERVER_PORT))?;
    send(fd.as_raw_fd(), payload, MsgFlags::empty())?;
    Ok(())
}
