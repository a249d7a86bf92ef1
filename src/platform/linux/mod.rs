//! Linux platform implementation.
//!
//! Descriptor helpers and the `/proc/net/tcp` reader. The reader takes the
//! procfs root as a parameter so tests can point it at a fixture directory.

mod procfs;

pub use procfs::read_established;

use std::io;
use std::os::unix::io::RawFd;

/// Default procfs mount point.
pub const PROC_DIR: &str = "/proc";

/// Put `fd` in non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
