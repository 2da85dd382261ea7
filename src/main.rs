//! Daemon startup: configuration, interface probe, signal plumbing,
//! privilege drop, then the event loop. Fatal startup errors all funnel
//! through the `Result` so cleanup runs before the nonzero exit.

use ndhc::config::{parse_args, ClientConfig};
use ndhc::dhcp::client::ClientState;
use ndhc::sockets::SocketManager;
use ndhc::{eventloop, ifchd, privs, sys, Error};

use log::{error, info};

fn run() -> Result<i32, Error> {
    let mut cfg: ClientConfig = parse_args(std::env::args().skip(1))?;

    info!("ndhc client {} started.", env!("CARGO_PKG_VERSION"));

    // Not forking means nobody else will write the pidfile for us
    if cfg.foreground && !cfg.background_if_no_lease {
        sys::write_pid(&cfg.pidfile)?;
    }

    let (ifindex, mac) = sys::read_interface(&cfg.interface)?;
    cfg.ifindex = ifindex;
    cfg.client_mac = mac;
    if cfg.client_id.is_empty() {
        // Default client identifier: hardware type 1 + our MAC
        let mut id = vec![1_u8];
        id.extend_from_slice(&mac.0);
        cfg.client_id = id;
    }

    let mut sfd = eventloop::setup_signals()?;

    if let Some(dir) = cfg.chroot_dir.clone() {
        privs::enter_chroot(&dir)?;
    }
    if let Some((uid, gid)) = cfg.user {
        privs::drop_privileges(uid, gid)?;
    }

    let cfg = cfg; // frozen from here on
    let mut cs = ClientState::new(SocketManager::new(cfg.ifindex)?);

    // Start from a clean slate: no address until a lease says otherwise
    ifchd::notify_deconfig(&cfg)?;

    eventloop::run(&mut cs, &cfg, &mut sfd)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
