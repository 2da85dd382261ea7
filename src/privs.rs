//! Privilege dropping: chroot, uid/gid switch, and retention of the three
//! network capabilities the reopen paths need afterwards.

use crate::Error;

use nix::unistd::{chdir, chroot, setgid, setgroups, setuid, Gid, Uid, User};

const CAP_NET_BIND_SERVICE: u32 = 10;
const CAP_NET_BROADCAST: u32 = 11;
const CAP_NET_RAW: u32 = 13;

/// Resolve a login name to its uid/gid. Must run before chroot, while the
/// passwd database is still reachable.
pub fn resolve_user(name: &str) -> Result<(Uid, Gid), Error> {
    match User::from_name(name)? {
        Some(user) => Ok((user.uid, user.gid)),
        None => Err(Error::Startup(format!("bad username provided: {name}"))),
    }
}

/// chdir into the jail directory and chroot to it.
pub fn enter_chroot(dir: &str) -> Result<(), Error> {
    chdir(dir).map_err(|e| Error::Startup(format!("failed to chdir({dir}): {e}")))?;
    chroot(dir).map_err(|e| Error::Startup(format!("failed to chroot({dir}): {e}")))?;
    Ok(())
}

/// Switch to the unprivileged uid/gid, keeping only the network capabilities
/// needed to reopen raw and low-port sockets later.
pub fn drop_privileges(uid: Uid, gid: Gid) -> Result<(), Error> {
    // Keep permitted capabilities across the uid change
    set_keepcaps(true)?;

    setgroups(&[gid])?;
    setgid(gid)?;
    setuid(uid)?;

    set_net_caps()?;
    set_keepcaps(false)?;
    Ok(())
}

fn set_keepcaps(keep: bool) -> Result<(), Error> {
    let r = unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, keep as libc::c_ulong, 0, 0, 0) };
    if r < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(())
}

// Not exposed by the `libc` crate; layout matches the kernel's capset(2) ABI
// (linux/capability.h).
#[repr(C)]
struct UserCapHeaderStruct {
    version: u32,
    pid: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct UserCapDataStruct {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// capset(2) down to NET_BIND_SERVICE + NET_BROADCAST + NET_RAW,
/// permitted and effective.
fn set_net_caps() -> Result<(), Error> {
    let mask: u32 = (1 << CAP_NET_BIND_SERVICE) | (1 << CAP_NET_BROADCAST) | (1 << CAP_NET_RAW);

    let header = UserCapHeaderStruct {
        // _LINUX_CAPABILITY_VERSION_3
        version: 0x2008_0522,
        pid: 0,
    };
    let mut data: [UserCapDataStruct; 2] = [UserCapDataStruct::default(); 2];
    data[0].permitted = mask;
    data[0].effective = mask;

    let r = unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
    if r < 0 {
        return Err(nix::errno::Errno::last().into());
    }
    Ok(())
}
