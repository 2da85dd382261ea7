//! Immutable daemon configuration and the command line that produces it.

use crate::{Error, IpV4Addr, MacAddr};

use nix::unistd::{Gid, Uid};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything decided at startup. Filled in by [parse_args] plus the
/// interface probe in `main`, then never mutated again.
pub struct ClientConfig {
    /// Interface the lease is negotiated on
    pub interface: String,
    /// Client-identifier option payload (defaults to type 1 + MAC)
    pub client_id: Vec<u8>,
    /// Host-name option payload, if any
    pub hostname: Option<Vec<u8>>,
    /// Do not detach after obtaining a lease
    pub foreground: bool,
    /// Detach once the initial discover cycle fails instead of at bind
    pub background_if_no_lease: bool,
    /// Exit nonzero if the initial discover cycle fails
    pub abort_if_no_lease: bool,
    /// Exit zero after the first successful bind
    pub quit_after_lease: bool,
    /// Address to ask for in the first discover
    pub request_ip: Option<IpV4Addr>,
    /// Where to record our pid
    pub pidfile: String,
    /// Jail directory, entered before privileges drop
    pub chroot_dir: Option<String>,
    /// Credentials to drop to
    pub user: Option<(Uid, Gid)>,
    /// Path of the ifchd command socket (relative to the chroot)
    pub ifchd_sock: String,
    /// Interface index, from the startup probe
    pub ifindex: i32,
    /// Interface hardware address, from the startup probe
    pub client_mac: MacAddr,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            interface: "eth0".to_string(),
            client_id: Vec::new(),
            hostname: None,
            foreground: false,
            background_if_no_lease: false,
            abort_if_no_lease: false,
            quit_after_lease: false,
            request_ip: None,
            pidfile: "/var/run/ndhc.pid".to_string(),
            chroot_dir: None,
            user: None,
            ifchd_sock: "ifchange".to_string(),
            ifindex: 0,
            client_mac: MacAddr::ANY,
        }
    }
}

fn show_usage() {
    print!(
        "Usage: ndhc [OPTIONS]\n\n\
         \x20 -c, --clientid=CLIENTID         Client identifier\n\
         \x20 -H, --hostname=HOSTNAME         Client hostname\n\
         \x20 -h                              Alias for -H\n\
         \x20 -f, --foreground                Do not fork after getting lease\n\
         \x20 -b, --background                Fork to background if lease cannot be\n\
         \x20                                 immediately negotiated.\n\
         \x20 -p, --pidfile=FILE              File to which the pid will be written\n\
         \x20 -i, --interface=INTERFACE       Interface to use (default: eth0)\n\
         \x20 -n, --now                       Exit with failure if lease cannot be\n\
         \x20                                 immediately negotiated.\n\
         \x20 -q, --quit                      Quit after obtaining lease\n\
         \x20 -r, --request=IP                IP address to request (default: none)\n\
         \x20 -u, --user=USER                 Change privileges to this user\n\
         \x20 -C, --chroot=DIR                Directory to which ndhc should chroot\n\
         \x20 -v, --version                   Display version\n"
    );
}

fn opt_value(
    opt: &str,
    inline: Option<&str>,
    it: &mut impl Iterator<Item = String>,
) -> Result<String, Error> {
    if let Some(v) = inline {
        return Ok(v.to_string());
    }
    it.next()
        .ok_or_else(|| Error::Startup(format!("option {opt} requires a value")))
}

/// An option string, truncated to the 255 bytes a TLV can carry
fn opt_bytes(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.truncate(255);
    v
}

/// Parse the command line (without argv[0]). Prints and exits for
/// `--help`/`--version`, like the usage text promises.
pub fn parse_args(args: impl Iterator<Item = String>) -> Result<ClientConfig, Error> {
    let mut cfg = ClientConfig::default();
    let mut it = args;

    while let Some(arg) = it.next() {
        let (name, inline) = match arg.split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (arg, None),
        };
        let inline = inline.as_deref();
        match name.as_str() {
            "-c" | "--clientid" => cfg.client_id = opt_bytes(&opt_value(&name, inline, &mut it)?),
            "-H" | "-h" | "--hostname" => {
                cfg.hostname = Some(opt_bytes(&opt_value(&name, inline, &mut it)?))
            }
            "-f" | "--foreground" => cfg.foreground = true,
            "-b" | "--background" => cfg.background_if_no_lease = true,
            "-p" | "--pidfile" => cfg.pidfile = opt_value(&name, inline, &mut it)?,
            "-i" | "--interface" => cfg.interface = opt_value(&name, inline, &mut it)?,
            "-n" | "--now" => cfg.abort_if_no_lease = true,
            "-q" | "--quit" => cfg.quit_after_lease = true,
            "-r" | "--request" => {
                let v = opt_value(&name, inline, &mut it)?;
                let addr: std::net::Ipv4Addr = v
                    .parse()
                    .map_err(|_| Error::Startup(format!("bad request address: {v}")))?;
                cfg.request_ip = Some(addr.into());
            }
            "-u" | "--user" => {
                let v = opt_value(&name, inline, &mut it)?;
                cfg.user = Some(crate::privs::resolve_user(&v)?);
            }
            "-C" | "--chroot" => cfg.chroot_dir = Some(opt_value(&name, inline, &mut it)?),
            "-v" | "--version" => {
                println!("ndhc, version {VERSION}");
                std::process::exit(0);
            }
            "-?" | "--help" => {
                show_usage();
                std::process::exit(0);
            }
            other => {
                show_usage();
                return Err(Error::Startup(format!("unknown option: {other}")));
            }
        }
    }
    Ok(cfg)
}

#[cfg(test)]
mod test {
    use super::*;

    fn argv(args: &[&str]) -> impl Iterator<Item = String> {
        args.iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_args(argv(&[])).unwrap();
        assert_eq!(cfg.interface, "eth0");
        assert!(!cfg.foreground);
        assert!(cfg.request_ip.is_none());
        assert_eq!(cfg.pidfile, "/var/run/ndhc.pid");
    }

    #[test]
    fn test_flags_and_values() {
        let cfg = parse_args(argv(&[
            "-f",
            "-q",
            "--interface=wlan0",
            "-r",
            "192.0.2.50",
            "--hostname",
            "larch",
        ]))
        .unwrap();
        assert!(cfg.foreground);
        assert!(cfg.quit_after_lease);
        assert_eq!(cfg.interface, "wlan0");
        assert_eq!(cfg.request_ip, Some(IpV4Addr::new([192, 0, 2, 50])));
        assert_eq!(cfg.hostname.as_deref(), Some(b"larch".as_slice()));
    }

    #[test]
    fn test_bad_args() {
        assert!(parse_args(argv(&["--request", "not-an-ip"])).is_err());
        assert!(parse_args(argv(&["--interface"])).is_err());
        assert!(parse_args(argv(&["--frobnicate"])).is_err());
    }
}
