//! # imagereg-core
//!
//! Registry of the binary images loaded into the current process, for use
//! by a crash reporter.
//!
//! This crate provides:
//! - A lock-free, append-only list of loaded Mach-O images kept current by
//!   the dynamic loader ([`registry`])
//! - Mach-O header parsing over live memory ([`macho`]), including the
//!   `__crash_info` record ([`diagnostic`])
//! - A memory probe that reports unreadable ranges instead of faulting
//!   ([`probe`])
//!
//! Registry queries never lock and never allocate, so they can run inside a
//! signal handler while other threads are frozen mid-update.
//!
//! ## Platform Support
//!
//! - **macOS**: dyld add/remove callbacks, `mach_vm_read_overwrite`, `dladdr`
//! - **Linux**: `process_vm_readv` and `dladdr`; images are injected, there
//!   is no Mach-O loader to hook
//! - **Other**: the registry works, but the system probe reads nothing
//!
//! ## Why unsafe code is needed
//!
//! The registry hands out references into nodes that are shared between
//! threads through raw atomic pointers, and the parser reads structures at
//! addresses handed to it by the loader. Both need `unsafe`. Each use is
//! wrapped in a safe API whose contract is documented at the call site.
//!
//! ## Example
//!
//! ```rust,no_run
//! use imagereg_core::{global, Address};
//!
//! global::initialize();
//! if let Some(image) = global::image_at(Address::new(0x1_0000_4000)) {
//!     println!("{} {:?}", image.name(), image.build_id());
//! }
//! ```

#![allow(unsafe_code)] // Required for the lock-free list and raw header reads

pub mod diagnostic;
pub mod error;
pub mod macho;
pub mod platform;
pub mod probe;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use diagnostic::DiagnosticRecord;
pub use error::{DiagnosticError, ParseError, ParseResult};
pub use macho::{HeaderParser, ParsedImage};
pub use platform::{LoaderHooks, MemoryProbe, ModuleLookup, NoLoaderHooks, SystemLookup, SystemProbe};
pub use registry::{global, BinaryImage, ImageRegistry, Images};
pub use types::{Address, AddressRange, Architecture, BuildId, ImageVersion};
