//! The single-threaded event loop: one epoll set carrying the DHCP listen
//! fd (when present), the ARP fd (when present), and a signal fd, plus one
//! scalar millisecond deadline.
//!
//! Signals are delivered through a signalfd, so they are ordinary readiness
//! events; nothing here runs in signal-handler context. Exactly one handler
//! runs per ready fd per wake, and the state's timeout handler runs once
//! the deadline has passed.

use crate::config::ClientConfig;
use crate::dhcp::client::{self, ClientState};
use crate::{probe, sys, Error};

use log::info;
use nix::errno::Errno;
use nix::sys::epoll::EpollEvent;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::{AsRawFd, RawFd};

/// Block SIGUSR1/SIGUSR2/SIGTERM and return a signalfd carrying them.
pub fn setup_signals() -> Result<SignalFd, Error> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGUSR1);
    mask.add(Signal::SIGUSR2);
    mask.add(Signal::SIGTERM);
    mask.thread_block()?;
    Ok(SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK)?)
}

fn signal_dispatch(
    cs: &mut ClientState,
    cfg: &ClientConfig,
    sfd: &mut SignalFd,
) -> Result<(), Error> {
    while let Some(siginfo) = sfd.read_signal()? {
        match siginfo.ssi_signo as i32 {
            x if x == Signal::SIGUSR1 as i32 => client::force_renew_action(cs, cfg)?,
            x if x == Signal::SIGUSR2 as i32 => client::force_release_action(cs, cfg)?,
            x if x == Signal::SIGTERM as i32 => {
                info!("Received SIGTERM.  Exiting gracefully.");
                cs.exit_code = Some(0);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Run the daemon until a handler asks to exit. Returns the exit code.
pub fn run(
    cs: &mut ClientState,
    cfg: &ClientConfig,
    sfd: &mut SignalFd,
) -> Result<i32, Error> {
    let signal_fd: RawFd = sfd.as_raw_fd();
    cs.sockets.register_external(signal_fd);
    cs.sockets.set_listen_raw()?;
    // Prime the pump: the first timeout fires the first discover
    client::timeout_action(cs, cfg)?;

    let mut events = [EpollEvent::empty(); 3];
    loop {
        if let Some(code) = cs.exit_code {
            return Ok(code);
        }

        let last_awake = sys::curms();
        let n = match cs.sockets.wait(&mut events, cs.timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        };

        for event in &events[..n] {
            let fd = event.data() as RawFd;
            if fd == signal_fd {
                signal_dispatch(cs, cfg, sfd)?;
            } else if Some(fd) == cs.sockets.listen_raw_fd() {
                client::handle_packet(cs, cfg)?;
            } else if Some(fd) == cs.sockets.arp_raw_fd() {
                probe::handle_arp_response(cs, cfg)?;
            } else {
                // An fd we do not own being ready means the readiness set
                // and the socket manager have diverged
                panic!("epoll returned unknown fd {fd}");
            }
        }

        if let Some(code) = cs.exit_code {
            return Ok(code);
        }

        if cs.timeout >= 0 {
            cs.timeout -= sys::curms() - last_awake;
            if cs.timeout <= 0 {
                cs.timeout = 0;
                client::timeout_action(cs, cfg)?;
            }
        }
    }
}
