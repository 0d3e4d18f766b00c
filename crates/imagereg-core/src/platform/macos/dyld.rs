//! # dyld Loader Hooks
//!
//! Feeds an [`ImageRegistry`] from dyld's image notifications.
//!
//! `_dyld_register_func_for_add_image` replays every already-loaded image
//! synchronously and then reports each later load, which is exactly the
//! contract [`LoaderHooks`] asks for. Two things it does not do:
//!
//! - report dyld itself (its header is not part of the `_dyld_*` API), so we
//!   find it through `task_info(TASK_DYLD_INFO)` and register it first;
//! - carry a context pointer, so the callbacks reach the registry through a
//!   process-wide [`AtomicPtr`].

use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::c_void;
use mach2::kern_return::KERN_SUCCESS;
use mach2::traps::mach_task_self;
use tracing::{debug, error, warn};

use super::ffi::{self, DyldAllImageInfos, TaskDyldInfo};
use crate::macho::HeaderParser;
use crate::platform::{LoaderHooks, SystemProbe};
use crate::probe::{is_readable, read_c_string};
use crate::registry::ImageRegistry;
use crate::types::Address;

/// `PATH_MAX` plus the terminator.
const MAX_PATH_LEN: usize = libc::PATH_MAX as usize + 1;

/// Registry the dyld trampolines forward to. Set once, never cleared.
static TARGET: AtomicPtr<ImageRegistry> = AtomicPtr::new(ptr::null_mut());

/// Cached `dyld_all_image_infos`, found on first use.
static ALL_IMAGE_INFOS: AtomicPtr<DyldAllImageInfos> = AtomicPtr::new(ptr::null_mut());

/// [`LoaderHooks`] backed by dyld's add/remove image callbacks
///
/// dyld callbacks cannot be unregistered, so only one registry per process
/// can ever be fed this way. Installing into the same registry again (after
/// [`ImageRegistry::reset_for_tests`]) replays the current image list by
/// index instead of registering a second pair of callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DyldHooks;

impl LoaderHooks for DyldHooks
{
    fn install(&self, registry: &'static ImageRegistry)
    {
        let wanted = ptr::from_ref(registry).cast_mut();
        match TARGET.compare_exchange(ptr::null_mut(), wanted, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                register_dyld_image(registry);
                // SAFETY: the trampolines are `extern "C"` and live for the whole process.
                unsafe {
                    ffi::_dyld_register_func_for_add_image(on_add_image);
                    ffi::_dyld_register_func_for_remove_image(on_remove_image);
                }
            }
            Err(current) if current == wanted => {
                register_dyld_image(registry);
                replay_loaded_images(registry);
            }
            Err(_) => {
                warn!("dyld callbacks already feed another image registry; not installing");
            }
        }
    }
}

extern "C" fn on_add_image(header: *const c_void, slide: isize)
{
    if let Some(registry) = target() {
        registry.add(Address::from_ptr(header), slide);
    }
}

extern "C" fn on_remove_image(header: *const c_void, slide: isize)
{
    if let Some(registry) = target() {
        registry.remove(Address::from_ptr(header), slide);
    }
}

fn target() -> Option<&'static ImageRegistry>
{
    // SAFETY: TARGET only ever holds a `&'static ImageRegistry`.
    unsafe { TARGET.load(Ordering::Acquire).as_ref() }
}

fn replay_loaded_images(registry: &ImageRegistry)
{
    // SAFETY: the _dyld_* index accessors return null / 0 once the index is out of range.
    let count = unsafe { ffi::_dyld_image_count() };
    for index in 0..count {
        let header = unsafe { ffi::_dyld_get_image_header(index) };
        if header.is_null() {
            break;
        }
        let slide = unsafe { ffi::_dyld_get_image_vmaddr_slide(index) };
        registry.add(Address::from_ptr(header), slide);
    }
}

/// Register dyld's own image, which the `_dyld_*` callbacks never report.
fn register_dyld_image(registry: &ImageRegistry)
{
    let Some(infos) = all_image_infos() else {
        return;
    };
    let header = Address::from_ptr(infos.dyld_image_load_address);
    if header.is_null() {
        return;
    }
    let slide = HeaderParser::new(&SystemProbe, &crate::platform::SystemLookup)
        .text_slide(header)
        .unwrap_or(0);
    debug!(%header, slide, "registering dyld image");
    registry.add(header, slide);
}

/// dyld's `dyld_all_image_infos`, located through `task_info(TASK_DYLD_INFO)`.
pub fn all_image_infos() -> Option<&'static DyldAllImageInfos>
{
    let cached = ALL_IMAGE_INFOS.load(Ordering::Acquire);
    if !cached.is_null() {
        // SAFETY: only ever set to dyld's structure, which lives for the whole process.
        return unsafe { cached.as_ref() };
    }

    let mut info = TaskDyldInfo::default();
    let mut count = ffi::TASK_DYLD_INFO_COUNT;
    // SAFETY: `info` is sized for TASK_DYLD_INFO and `count` says so.
    let result = unsafe { ffi::task_info(mach_task_self(), ffi::TASK_DYLD_INFO, &mut info, &mut count) };
    let address = info.all_image_info_addr;
    if result != KERN_SUCCESS || address == 0 {
        error!(result, "task_info(TASK_DYLD_INFO) failed");
        return None;
    }

    let start = Address::new(address);
    if !is_readable(&SystemProbe, start, size_of::<DyldAllImageInfos>()) {
        warn!(%start, "dyld_all_image_infos is not readable");
        return None;
    }
    let infos = address as usize as *mut DyldAllImageInfos;
    ALL_IMAGE_INFOS.store(infos, Ordering::Release);
    // SAFETY: probed above; dyld's structure lives for the whole process.
    unsafe { infos.as_ref() }
}

/// Path for headers dyld knows about but `dladdr` does not.
///
/// Today that is only dyld itself.
pub fn dyld_path_for(header: Address) -> Option<String>
{
    let infos = all_image_infos()?;
    if infos.version < ffi::DYLD_PATH_MIN_VERSION {
        return None;
    }
    if header != Address::from_ptr(infos.dyld_image_load_address) || infos.dyld_path.is_null() {
        return None;
    }
    read_c_string(&SystemProbe, Address::from_ptr(infos.dyld_path), MAX_PATH_LEN)
}
