//! Registry entries.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use object::macho::MH_EXECUTE;

use crate::diagnostic::DiagnosticRecord;
use crate::macho::ParsedImage;
use crate::types::{Address, AddressRange, Architecture, BuildId, ImageVersion};

/// One loaded module, as seen by the registry
///
/// Everything except the two flags is frozen before the entry is published
/// and never changes afterwards, so a reader holding a `&BinaryImage` (even
/// from a signal handler) sees a stable value. Entries are never unlinked;
/// an unloaded module stays in the list with [`is_unloaded`](Self::is_unloaded)
/// set.
#[derive(Debug)]
pub struct BinaryImage
{
    load_address: Address,
    static_address: Address,
    slide: isize,
    size: u64,
    name: String,
    build_id: Option<BuildId>,
    cpu_type: i32,
    cpu_subtype: i32,
    file_type: u32,
    version: ImageVersion,
    diagnostic: Option<DiagnosticRecord>,

    unloaded: AtomicBool,
    in_crash_report: AtomicBool,
    pub(super) next: AtomicPtr<BinaryImage>,
}

impl BinaryImage
{
    pub(crate) fn from_parsed(parsed: ParsedImage) -> Self
    {
        Self {
            load_address: parsed.load_address,
            static_address: parsed.static_address,
            slide: parsed.slide,
            size: parsed.size,
            name: parsed.name,
            build_id: parsed.build_id,
            cpu_type: parsed.cpu_type,
            cpu_subtype: parsed.cpu_subtype,
            file_type: parsed.file_type,
            version: parsed.version,
            diagnostic: parsed.diagnostic,
            unloaded: AtomicBool::new(false),
            in_crash_report: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Runtime address of the Mach-O header.
    pub fn load_address(&self) -> Address
    {
        self.load_address
    }

    /// Link-time `vmaddr` of `__TEXT`.
    pub fn static_address(&self) -> Address
    {
        self.static_address
    }

    pub fn slide(&self) -> isize
    {
        self.slide
    }

    /// `vmsize` of `__TEXT`.
    pub fn size(&self) -> u64
    {
        self.size
    }

    /// `[load_address, load_address + size)`
    pub fn range(&self) -> AddressRange
    {
        AddressRange::new(self.load_address, self.size)
    }

    /// Module path as reported by the loader.
    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn build_id(&self) -> Option<BuildId>
    {
        self.build_id
    }

    pub fn cpu_type(&self) -> i32
    {
        self.cpu_type
    }

    pub fn cpu_subtype(&self) -> i32
    {
        self.cpu_subtype
    }

    pub fn architecture(&self) -> Architecture
    {
        Architecture::from_cpu_type(self.cpu_type, self.cpu_subtype)
    }

    /// Mach-O `filetype` (`MH_EXECUTE`, `MH_DYLIB`, ...).
    pub fn file_type(&self) -> u32
    {
        self.file_type
    }

    /// Whether this is a main executable.
    pub fn is_executable(&self) -> bool
    {
        self.file_type == MH_EXECUTE
    }

    pub fn version(&self) -> ImageVersion
    {
        self.version
    }

    /// `__crash_info` strings captured when the module was registered.
    pub fn diagnostic(&self) -> Option<&DiagnosticRecord>
    {
        self.diagnostic.as_ref()
    }

    pub fn is_unloaded(&self) -> bool
    {
        self.unloaded.load(Ordering::Acquire)
    }

    /// Scratch flag for report builders. The registry never reads it.
    pub fn in_crash_report(&self) -> bool
    {
        self.in_crash_report.load(Ordering::Acquire)
    }

    pub fn set_in_crash_report(&self, value: bool)
    {
        self.in_crash_report.store(value, Ordering::Release);
    }

    /// Next entry in registration order, as far as this reader can see.
    pub fn next(&self) -> Option<&BinaryImage>
    {
        // SAFETY: `next` is either null or a published node owned by the
        // same registry, which outlives `self`.
        unsafe { self.next.load(Ordering::Acquire).as_ref() }
    }

    /// Whether `address` falls inside this module's `__TEXT` range and the
    /// module is still loaded.
    pub fn contains(&self, address: Address) -> bool
    {
        !self.is_unloaded() && self.range().contains(address)
    }

    pub(crate) fn mark_unloaded(&self)
    {
        self.unloaded.store(true, Ordering::Release);
    }
}
