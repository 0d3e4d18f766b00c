//! # Platform-Specific Implementations
//!
//! The registry itself is portable. What differs per platform is how it
//! talks to the outside world:
//!
//! - **[`MemoryProbe`]**: asking the kernel whether a range is readable
//! - **[`ModuleLookup`]**: turning a header address into a path
//! - **[`LoaderHooks`]**: subscribing to the dynamic loader's load/unload
//!   notifications
//!
//! - **macOS / iOS**: `mach_vm_read_overwrite`, `dladdr` plus dyld's
//!   `dyld_all_image_infos`, and `_dyld_register_func_for_add_image`
//!   - See: [dyld(3)](https://developer.apple.com/library/archive/documentation/System/Conceptual/ManPages_iPhoneOS/man3/dyld.3.html)
//! - **Linux / Android**: `process_vm_readv` and `dladdr`. There is no
//!   Mach-O loader to hook, so images only arrive through
//!   [`ImageRegistry::inject_load`](crate::registry::ImageRegistry::inject_load).
//!
//! Tests swap any of the three for fixtures via
//! [`ImageRegistry::with_platform`](crate::registry::ImageRegistry::with_platform).

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(unix)]
mod unix;

#[cfg(target_os = "macos")]
pub mod macos;

pub use crate::probe::MemoryProbe;
use crate::registry::ImageRegistry;
use crate::types::Address;

/// Resolves header addresses to module paths
///
/// Lookups happen while an image is being added, on the loader's thread,
/// never from a crash handler. They may allocate.
pub trait ModuleLookup: Sync
{
    /// Path of the module whose Mach-O header is at `header`.
    fn path_for(&self, header: Address) -> Option<String>;

    /// Header address of the module containing this crate, if known.
    ///
    /// The registry compares every new image against this to find its
    /// "self" entry.
    fn self_header(&self) -> Option<Address>
    {
        None
    }
}

/// Subscription to the dynamic loader's image notifications
///
/// `install` must synchronously call [`ImageRegistry::add`] once for every
/// image already resident, then keep calling `add` / `remove` for the rest of
/// the process lifetime, from whatever thread the loader uses.
pub trait LoaderHooks: Sync
{
    /// Start feeding `registry`.
    fn install(&self, registry: &'static ImageRegistry);
}

/// Hooks for platforms without a Mach-O loader
///
/// Installing them does nothing; images arrive only through injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoaderHooks;

impl LoaderHooks for NoLoaderHooks
{
    fn install(&self, _registry: &'static ImageRegistry)
    {
        tracing::debug!("no dynamic loader hooks on this platform; registry is fed by injection only");
    }
}

/// Kernel-backed [`MemoryProbe`] for the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

// SAFETY: both backends only count bytes the kernel managed to copy.
unsafe impl MemoryProbe for SystemProbe
{
    fn max_readable_bytes(&self, address: Address, max_len: usize) -> usize
    {
        #[cfg(target_os = "macos")]
        {
            macos::memory::max_readable_bytes(address, max_len)
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            linux::max_readable_bytes(address, max_len)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "android")))]
        {
            let _ = (address, max_len);
            0
        }
    }
}

/// `dladdr`-backed [`ModuleLookup`], with dyld's tables as a fallback on macOS
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl ModuleLookup for SystemLookup
{
    fn path_for(&self, header: Address) -> Option<String>
    {
        #[cfg(target_os = "macos")]
        {
            unix::dladdr_path(header).or_else(|| macos::dyld::dyld_path_for(header))
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            unix::dladdr_path(header)
        }

        #[cfg(not(unix))]
        {
            let _ = header;
            None
        }
    }

    fn self_header(&self) -> Option<Address>
    {
        #[cfg(unix)]
        {
            unix::own_image_base()
        }

        #[cfg(not(unix))]
        {
            None
        }
    }
}

/// Loader hooks the process-wide registry installs on this platform.
#[cfg(target_os = "macos")]
pub type SystemLoaderHooks = macos::dyld::DyldHooks;

/// Loader hooks the process-wide registry installs on this platform.
#[cfg(not(target_os = "macos"))]
pub type SystemLoaderHooks = NoLoaderHooks;
