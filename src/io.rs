//! Light wrappers for POSIX I/O: restart on EINTR, accumulate partial
//! transfers, and treat EAGAIN on a non-blocking fd as "done for now".

use nix::errno::Errno;
use nix::unistd;
use std::os::fd::{AsFd, AsRawFd, RawFd};

/// Read until the buffer is full, EOF, or the socket runs dry.
/// Returns the number of bytes placed in `buf`.
pub fn safe_read(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    let mut s = 0_usize;
    while s < buf.len() {
        match unistd::read(fd, &mut buf[s..]) {
            Ok(0) => break,
            Ok(r) => s += r,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(s)
}

/// Write the whole buffer, restarting on EINTR.
pub fn safe_write<Fd: AsFd + Copy>(fd: Fd, buf: &[u8]) -> nix::Result<usize> {
    let mut s = 0_usize;
    while s < buf.len() {
        match unistd::write(fd.as_fd().as_raw_fd(), &buf[s..]) {
            Ok(r) => s += r,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(s)
}

/// Send one datagram to a link-layer address, restarting on EINTR.
pub fn safe_sendto_ll(fd: RawFd, buf: &[u8], addr: &libc::sockaddr_ll) -> nix::Result<usize> {
    loop {
        let r = unsafe {
            libc::sendto(
                fd,
                buf.as_ptr().cast(),
                buf.len(),
                0,
                (addr as *const libc::sockaddr_ll).cast(),
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if r >= 0 {
            return Ok(r as usize);
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => return Err(e),
        }
    }
}
