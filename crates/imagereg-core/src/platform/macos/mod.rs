//! # macOS Platform Support
//!
//! - **memory**: the kernel-assisted [`MemoryProbe`](crate::probe::MemoryProbe)
//! - **dyld**: loader hooks and access to dyld's own image tables
//! - **ffi**: declarations for the dyld / Mach calls above
//!
//! ## Dependencies
//!
//! - **mach2 crate**: `mach_task_self`, `mach_vm_read_overwrite`, `KERN_SUCCESS`
//! - **libc crate**: C type definitions and `dladdr`
//! - **extern "C"**: dyld registration functions and `task_info`

pub mod dyld;
pub mod ffi;
pub mod memory;

pub use dyld::DyldHooks;
