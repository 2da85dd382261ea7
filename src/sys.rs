//! Process-level plumbing: the monotonic clock the timer runs on, interface
//! introspection, the pidfile, and daemonization.

use crate::{Error, MacAddr};

use log::info;
use nix::time::{clock_gettime, ClockId};
use std::os::fd::AsRawFd;

/// Monotonic milliseconds. All deadlines in the state machine are relative
/// to this clock, never wall time.
pub fn curms() -> i64 {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).expect("CLOCK_MONOTONIC unavailable");
    ts.tv_sec() * 1000 + ts.tv_nsec() / 1_000_000
}

/// Interface index and hardware address, via ioctl on a throwaway socket.
pub fn read_interface(name: &str) -> Result<(i32, MacAddr), Error> {
    let fd = nix::sys::socket::socket(
        nix::sys::socket::AddressFamily::Inet,
        nix::sys::socket::SockType::Datagram,
        nix::sys::socket::SockFlag::empty(),
        None,
    )?;

    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    if name.len() >= req.ifr_name.len() {
        return Err(Error::Interface(name.to_string(), "interface name too long"));
    }
    for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }

    if unsafe { libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFINDEX, &mut req) } < 0 {
        return Err(Error::Interface(
            name.to_string(),
            "SIOCGIFINDEX failed, no such interface",
        ));
    }
    let ifindex = unsafe { req.ifr_ifru.ifru_ifindex };

    if unsafe { libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFHWADDR, &mut req) } < 0 {
        return Err(Error::Interface(
            name.to_string(),
            "SIOCGIFHWADDR failed, cannot read hardware address",
        ));
    }
    let sa_data = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
    let mut mac = [0_u8; 6];
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }

    let mac = MacAddr::new(mac);
    info!("interface {name}: index {ifindex}, hardware address {mac}");
    Ok((ifindex, mac))
}

/// Write our pid to the given path, truncating any previous contents.
pub fn write_pid(path: &str) -> Result<(), Error> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|e| Error::Startup(format!("cannot open pidfile {path} for write: {e}")))
}

/// Detach from the controlling terminal. Safe to call again once detached.
pub fn daemonize() -> Result<(), Error> {
    nix::unistd::daemon(false, false)?;
    Ok(())
}
