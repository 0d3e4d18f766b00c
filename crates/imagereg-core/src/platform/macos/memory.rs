//! # macOS Memory Probe
//!
//! Readability checks against our own task using `mach_vm_read_overwrite()`.
//!
//! The kernel performs the copy, so an unmapped or protected page comes back
//! as an error code rather than an `EXC_BAD_ACCESS`. This is the same
//! primitive crash reporters use to walk stacks from inside a signal handler.
//!
//! See: [mach_vm_read_overwrite](https://developer.apple.com/documentation/kernel/1402127-mach_vm_read_overwrite)

use mach2::kern_return::KERN_SUCCESS;
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_read_overwrite;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

use crate::probe::probe_in_chunks;
use crate::types::Address;

/// Number of readable bytes at `address`, up to `max_len`.
pub fn max_readable_bytes(address: Address, max_len: usize) -> usize
{
    probe_in_chunks(address, max_len, |source, scratch| {
        let mut copied: mach_vm_size_t = 0;
        // SAFETY: the kernel validates the source range; `scratch` is our own buffer.
        let result = unsafe {
            mach_vm_read_overwrite(
                mach_task_self(),
                source as mach_vm_address_t,
                scratch.len() as mach_vm_size_t,
                scratch.as_mut_ptr() as mach_vm_address_t,
                &mut copied,
            )
        };
        if result != KERN_SUCCESS {
            return None;
        }
        Some(copied as usize)
    })
}
