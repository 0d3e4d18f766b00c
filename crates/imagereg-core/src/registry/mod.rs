//! # Image Registry
//!
//! A lock-free, append-only list of every Mach-O image loaded into the
//! process, kept current by the dynamic loader and readable from a crash
//! handler.
//!
//! ## Concurrency
//!
//! Writers are the loader's callbacks, which may run on any thread. Readers
//! may be a signal handler on a thread that froze another thread halfway
//! through a write. So:
//!
//! - A node is fully built before anyone can see it, then published with a
//!   single `tail.swap` followed by a `Release` store into the previous
//!   tail's `next` (or into `head` for the first node).
//! - Readers follow `next` with `Acquire`. A null `next` just means "end of
//!   what has been published so far".
//! - The only mutation after publication is the one-way `unloaded` flag.
//! - Nodes are never unlinked or freed while the registry is live. Only
//!   [`ImageRegistry::reset_for_tests`] and `Drop` free them.
//!
//! Queries take no locks and allocate nothing.
//!
//! ## Example
//!
//! ```rust,no_run
//! use imagereg_core::registry::ImageRegistry;
//!
//! static IMAGES: ImageRegistry = ImageRegistry::new();
//!
//! IMAGES.initialize();
//! for image in IMAGES.all_images() {
//!     println!("{} {}", image.load_address(), image.name());
//! }
//! ```

mod image;

pub mod global;

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use tracing::{debug, trace};

pub use self::image::BinaryImage;
use crate::macho::HeaderParser;
use crate::platform::{LoaderHooks, MemoryProbe, ModuleLookup, SystemLoaderHooks, SystemLookup, SystemProbe};
use crate::types::{Address, BuildId};

/// Registry of loaded binary images
///
/// Const-constructible so the process-wide instance can be a plain
/// `static`; see [`global`]. Probe, lookup and loader hooks are injected
/// with [`with_platform`](Self::with_platform).
pub struct ImageRegistry
{
    probe: &'static dyn MemoryProbe,
    lookup: &'static dyn ModuleLookup,
    hooks: &'static dyn LoaderHooks,

    head: AtomicPtr<BinaryImage>,
    tail: AtomicPtr<BinaryImage>,
    self_image: AtomicPtr<BinaryImage>,
    initialized: AtomicBool,
}

impl ImageRegistry
{
    /// Registry wired to this platform's probe, `dladdr` lookup and loader hooks.
    pub const fn new() -> Self
    {
        Self::with_platform(&SystemProbe, &SystemLookup, &SystemLoaderHooks {})
    }

    /// Registry wired to caller-supplied platform services.
    pub const fn with_platform(
        probe: &'static dyn MemoryProbe,
        lookup: &'static dyn ModuleLookup,
        hooks: &'static dyn LoaderHooks,
    ) -> Self
    {
        Self {
            probe,
            lookup,
            hooks,
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            self_image: AtomicPtr::new(ptr::null_mut()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Install the loader hooks, once.
    ///
    /// The hooks replay every already-loaded image through [`add`](Self::add)
    /// before this returns. Later calls do nothing until
    /// [`reset_for_tests`](Self::reset_for_tests).
    pub fn initialize(&'static self)
    {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!("initializing image registry");
        self.hooks.install(self);
    }

    pub fn is_initialized(&self) -> bool
    {
        self.initialized.load(Ordering::Acquire)
    }

    /// Handle a load event.
    ///
    /// Images whose header cannot be parsed or named are dropped.
    pub fn add(&self, header: Address, slide: isize)
    {
        let parsed = match self.parser().parse(header, slide) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(%header, slide, %err, "dropping image load event");
                return;
            }
        };
        trace!(image = %parsed.name, %header, slide, "adding image");

        let node = Box::into_raw(Box::new(BinaryImage::from_parsed(parsed)));
        let previous = self.tail.swap(node, Ordering::AcqRel);
        // SAFETY: the tail is null or a node this registry published and still owns.
        match unsafe { previous.as_ref() } {
            Some(previous) => previous.next.store(node, Ordering::Release),
            None => self.head.store(node, Ordering::Release),
        }

        if self.lookup.self_header() == Some(header) {
            let claimed = self
                .self_image
                .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if claimed {
                debug!(%header, "registered own image");
            }
        }
    }

    /// Handle an unload event.
    ///
    /// The live entry loaded at `header` is marked unloaded. When the header
    /// has a `__TEXT` segment the entry must also be linked at the same
    /// `__TEXT` address, so a different image reusing the header address is
    /// left alone. No match is a no-op.
    pub fn remove(&self, header: Address, slide: isize)
    {
        let text = match self.parser().text_segment(header) {
            Ok(text) => text,
            Err(err) => {
                debug!(%header, slide, %err, "dropping image unload event");
                return;
            }
        };

        let mut marked = 0usize;
        for image in self.all_images().filter(|image| !image.is_unloaded()) {
            // Images outside the shared cache are all linked at vmaddr 0,
            // so the static address alone does not identify one.
            let same = image.load_address() == header
                && text.map_or(true, |text| image.static_address() == text.vmaddr);
            if same {
                image.mark_unloaded();
                marked += 1;
            }
        }

        if marked == 0 {
            debug!(%header, slide, "unload event matched no registered image");
        } else {
            trace!(%header, slide, marked, "marked image unloaded");
        }
    }

    /// Every entry in registration order, unloaded ones included.
    ///
    /// Safe to call concurrently with [`add`](Self::add); entries published
    /// during the walk may or may not be seen.
    pub fn all_images(&self) -> Images<'_>
    {
        // SAFETY: head is null or a node owned by `self`.
        Images {
            next: unsafe { self.head.load(Ordering::Acquire).as_ref() },
        }
    }

    /// The loaded image whose `__TEXT` range contains `address`.
    pub fn image_at(&self, address: Address) -> Option<&BinaryImage>
    {
        self.all_images().find(|image| image.contains(address))
    }

    /// First loaded image whose path equals `name` (`exact_match`) or
    /// contains it. An empty `name` matches nothing.
    pub fn image_named(&self, name: &str, exact_match: bool) -> Option<&BinaryImage>
    {
        if name.is_empty() {
            return None;
        }
        self.all_images().filter(|image| !image.is_unloaded()).find(|image| {
            if exact_match {
                image.name() == name
            } else {
                image.name().contains(name)
            }
        })
    }

    /// `LC_UUID` of the image found by [`image_named`](Self::image_named),
    /// re-read from its header.
    pub fn build_id_of(&self, name: &str, exact_match: bool) -> Option<BuildId>
    {
        let image = self.image_named(name, exact_match)?;
        self.parser().build_id(image.load_address())
    }

    /// First registered `MH_EXECUTE` image.
    pub fn main_image(&self) -> Option<&BinaryImage>
    {
        self.all_images().find(|image| image.is_executable())
    }

    /// The image containing this crate, once it has been registered.
    pub fn self_image(&self) -> Option<&BinaryImage>
    {
        // SAFETY: null or a node owned by `self`.
        unsafe { self.self_image.load(Ordering::Acquire).as_ref() }
    }

    /// Most recently published entry.
    pub fn last_image(&self) -> Option<&BinaryImage>
    {
        // SAFETY: null or a node owned by `self`.
        let last = unsafe { self.tail.load(Ordering::Acquire).as_ref() }?;
        // The tail is swapped in before it is linked; only report it once reachable.
        self.all_images().find(|image| ptr::eq(*image, last))
    }

    /// Number of entries, unloaded ones included.
    pub fn len(&self) -> usize
    {
        self.all_images().count()
    }

    pub fn is_empty(&self) -> bool
    {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Simulate a loader load event.
    pub fn inject_load(&self, header: Address, slide: isize)
    {
        self.add(header, slide);
    }

    /// Simulate a loader unload event.
    pub fn inject_unload(&self, header: Address, slide: isize)
    {
        self.remove(header, slide);
    }

    /// Free every entry and forget initialization.
    ///
    /// ## Safety
    ///
    /// No other thread may be reading or writing the registry, and no
    /// `&BinaryImage` obtained from it may be used afterwards.
    pub unsafe fn reset_for_tests(&self)
    {
        self.initialized.store(false, Ordering::Release);
        self.self_image.store(ptr::null_mut(), Ordering::Release);
        self.tail.store(ptr::null_mut(), Ordering::Release);
        let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: the caller guarantees exclusive access.
        unsafe { free_list(head) };
    }

    fn parser(&self) -> HeaderParser<'static>
    {
        HeaderParser::new(self.probe, self.lookup)
    }
}

impl Default for ImageRegistry
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Drop for ImageRegistry
{
    fn drop(&mut self)
    {
        let head = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        // SAFETY: `&mut self` rules out any other reader or writer.
        unsafe { free_list(head) };
    }
}

impl fmt::Debug for ImageRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ImageRegistry")
            .field("initialized", &self.is_initialized())
            .field("images", &self.len())
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a ImageRegistry
{
    type Item = &'a BinaryImage;
    type IntoIter = Images<'a>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.all_images()
    }
}

/// Iterator over registry entries, see [`ImageRegistry::all_images`].
#[derive(Debug, Clone)]
pub struct Images<'a>
{
    next: Option<&'a BinaryImage>,
}

impl<'a> Iterator for Images<'a>
{
    type Item = &'a BinaryImage;

    fn next(&mut self) -> Option<Self::Item>
    {
        let current = self.next?;
        self.next = current.next();
        Some(current)
    }
}

/// Free a chain of boxed nodes starting at `node`.
///
/// ## Safety
///
/// Every node in the chain must have come from `Box::into_raw` and be
/// unreachable by anyone else.
unsafe fn free_list(mut node: *mut BinaryImage)
{
    while !node.is_null() {
        // SAFETY: per the function contract.
        let boxed = unsafe { Box::from_raw(node) };
        node = boxed.next.load(Ordering::Acquire);
    }
}
