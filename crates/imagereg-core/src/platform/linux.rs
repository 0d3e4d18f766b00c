//! Linux memory probe.
//!
//! `process_vm_readv` against our own pid copies through the kernel and
//! reports `EFAULT` instead of faulting. Sandboxes that forbid it (seccomp
//! profiles, some container runtimes) fall back to writing the chunk into a
//! throwaway pipe, which fails the same way on unreadable memory.

use std::io;

use libc::{c_int, c_void, iovec};

use crate::probe::probe_in_chunks;
use crate::types::Address;

pub(crate) fn max_readable_bytes(address: Address, max_len: usize) -> usize
{
    probe_in_chunks(address, max_len, |source, scratch| {
        match vm_readv(source, scratch) {
            Ok(copied) => Some(copied),
            Err(err) if matches!(err.raw_os_error(), Some(libc::EPERM | libc::ENOSYS | libc::EACCES)) => {
                pipe_probe(source, scratch.len())
            }
            Err(_) => None,
        }
    })
}

fn vm_readv(source: u64, scratch: &mut [u8]) -> io::Result<usize>
{
    let local = iovec {
        iov_base: scratch.as_mut_ptr().cast::<c_void>(),
        iov_len: scratch.len(),
    };
    let remote = iovec {
        iov_base: source as usize as *mut c_void,
        iov_len: scratch.len(),
    };
    // SAFETY: the kernel validates `remote`; `local` is our own stack buffer.
    let copied = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
    if copied < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(copied as usize)
}

fn pipe_probe(source: u64, len: usize) -> Option<usize>
{
    let mut fds: [c_int; 2] = [-1, -1];
    // SAFETY: pipe/write/close are async-signal-safe; write validates the source buffer.
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return None;
        }
        let written = libc::write(fds[1], source as usize as *const c_void, len);
        libc::close(fds[0]);
        libc::close(fds[1]);
        if written < 0 { None } else { Some(written as usize) }
    }
}
