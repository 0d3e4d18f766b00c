//! Process-wide registry.
//!
//! The loader callbacks and the crash path both use this one instance.
//! Nothing here is lazily constructed: the registry is a `static` and
//! [`initialize`] is the only thing that starts it.

use super::{BinaryImage, ImageRegistry, Images};
use crate::types::{Address, BuildId};

static REGISTRY: ImageRegistry = ImageRegistry::new();

/// The process-wide registry.
pub fn registry() -> &'static ImageRegistry
{
    &REGISTRY
}

/// See [`ImageRegistry::initialize`].
pub fn initialize()
{
    REGISTRY.initialize();
}

pub fn all_images() -> Images<'static>
{
    REGISTRY.all_images()
}

pub fn image_at(address: Address) -> Option<&'static BinaryImage>
{
    REGISTRY.image_at(address)
}

pub fn image_named(name: &str, exact_match: bool) -> Option<&'static BinaryImage>
{
    REGISTRY.image_named(name, exact_match)
}

pub fn build_id_of(name: &str, exact_match: bool) -> Option<BuildId>
{
    REGISTRY.build_id_of(name, exact_match)
}

pub fn main_image() -> Option<&'static BinaryImage>
{
    REGISTRY.main_image()
}

pub fn self_image() -> Option<&'static BinaryImage>
{
    REGISTRY.self_image()
}

pub fn inject_load(header: Address, slide: isize)
{
    REGISTRY.inject_load(header, slide);
}

pub fn inject_unload(header: Address, slide: isize)
{
    REGISTRY.inject_unload(header, slide);
}

/// See [`ImageRegistry::reset_for_tests`].
///
/// ## Safety
///
/// Same contract: no concurrent users of the process-wide registry and no
/// surviving `&'static BinaryImage` from it.
pub unsafe fn reset_for_tests()
{
    // SAFETY: forwarded to the caller.
    unsafe { REGISTRY.reset_for_tests() };
}
