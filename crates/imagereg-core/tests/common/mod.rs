//! Shared fixtures: synthetic Mach-O images in leaked memory, plus a probe
//! and lookup that only know about memory the fixtures created.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::CString;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use imagereg_core::platform::{LoaderHooks, MemoryProbe, ModuleLookup, NoLoaderHooks};
use imagereg_core::registry::ImageRegistry;
use imagereg_core::types::Address;
use object::macho::{
    CPU_TYPE_ARM, CPU_TYPE_ARM64, LC_ID_DYLIB, LC_SEGMENT, LC_SEGMENT_64, LC_UUID, MH_DYLIB, MH_EXECUTE, MH_MAGIC,
    MH_MAGIC_64,
};

/// Readable regions and names for fixture images
///
/// Anything outside a registered region reads as unmapped.
#[derive(Default)]
pub struct Fixture
{
    regions: Mutex<Vec<(u64, u64)>>,
    names: Mutex<HashMap<u64, String>>,
    self_header: Mutex<Option<Address>>,
}

impl Fixture
{
    pub fn leak() -> &'static Fixture
    {
        Box::leak(Box::default())
    }

    pub fn add_region(&self, start: u64, len: u64)
    {
        self.regions.lock().unwrap().push((start, start + len));
    }

    pub fn set_name(&self, header: Address, name: &str)
    {
        self.names.lock().unwrap().insert(header.value(), name.to_string());
    }

    pub fn set_self_header(&self, header: Address)
    {
        *self.self_header.lock().unwrap() = Some(header);
    }

    /// Leak a NUL-terminated copy of `text` and make it readable.
    pub fn c_string(&self, text: &str) -> u64
    {
        let bytes = CString::new(text).unwrap().into_bytes_with_nul();
        self.leak_bytes(bytes)
    }

    /// Leak `bytes` verbatim (no terminator added) and make them readable.
    pub fn leak_bytes(&self, bytes: Vec<u8>) -> u64
    {
        let len = bytes.len() as u64;
        let address = Box::leak(bytes.into_boxed_slice()).as_ptr() as usize as u64;
        self.add_region(address, len);
        address
    }
}

// SAFETY: regions are only registered for leaked, never-freed allocations.
unsafe impl MemoryProbe for Fixture
{
    fn max_readable_bytes(&self, address: Address, max_len: usize) -> usize
    {
        let address = address.value();
        if address == 0 {
            return 0;
        }
        self.regions
            .lock()
            .unwrap()
            .iter()
            .find(|(start, end)| address >= *start && address < *end)
            .map_or(0, |(_, end)| ((end - address) as usize).min(max_len))
    }
}

impl ModuleLookup for Fixture
{
    fn path_for(&self, header: Address) -> Option<String>
    {
        self.names.lock().unwrap().get(&header.value()).cloned()
    }

    fn self_header(&self) -> Option<Address>
    {
        *self.self_header.lock().unwrap()
    }
}

/// Loader hooks that replay a fixed list of headers and count installs.
#[derive(Default)]
pub struct ReplayHooks
{
    headers: Mutex<Vec<Address>>,
    installs: AtomicUsize,
}

impl ReplayHooks
{
    pub fn leak(headers: Vec<Address>) -> &'static ReplayHooks
    {
        Box::leak(Box::new(ReplayHooks {
            headers: Mutex::new(headers),
            installs: AtomicUsize::new(0),
        }))
    }

    pub fn installs(&self) -> usize
    {
        self.installs.load(Ordering::SeqCst)
    }
}

impl LoaderHooks for ReplayHooks
{
    fn install(&self, registry: &'static ImageRegistry)
    {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let headers = self.headers.lock().unwrap().clone();
        for header in headers {
            registry.add(header, 0);
        }
    }
}

/// A registry over `fixture` with no loader hooks.
pub fn registry(fixture: &'static Fixture) -> &'static ImageRegistry
{
    Box::leak(Box::new(ImageRegistry::with_platform(fixture, fixture, &NoLoaderHooks)))
}

/// A pointer-sized field of a `__crash_info` record.
#[derive(Debug, Clone, Copy)]
pub enum Field
{
    Null,
    Text(&'static str),
    Raw(u64),
}

/// Contents of a synthetic `__crash_info` record.
#[derive(Debug, Clone, Copy)]
pub struct CrashInfo
{
    pub version: u32,
    pub message: Field,
    pub signature: Field,
    pub backtrace: Field,
    pub message2: Field,
    /// Advertised section size; defaults to the full record
    pub section_size: Option<u64>,
}

impl Default for CrashInfo
{
    fn default() -> Self
    {
        Self {
            version: 5,
            message: Field::Null,
            signature: Field::Null,
            backtrace: Field::Null,
            message2: Field::Null,
            section_size: None,
        }
    }
}

/// A synthetic image living in leaked memory.
#[derive(Debug, Clone, Copy)]
pub struct TestImage
{
    pub header: Address,
    pub len: u64,
}

impl TestImage
{
    pub fn at(&self, offset: u64) -> Address
    {
        self.header + offset
    }

    pub fn end(&self) -> Address
    {
        self.header + self.len
    }
}

const DYLIB_NAME: &[u8; 16] = b"@rpath/lib.dylib";

/// Builder for in-memory Mach-O images
///
/// By default the `__TEXT` segment is linked at the buffer's own address,
/// so the image parses cleanly at slide 0.
#[derive(Debug, Clone)]
pub struct MachOBuilder
{
    name: String,
    is_64: bool,
    swapped: bool,
    file_type: u32,
    cpu_type: u32,
    cpu_subtype: u32,
    text: bool,
    slide: isize,
    linked_at: Option<u64>,
    text_size: Option<u64>,
    uuid: Option<[u8; 16]>,
    version: Option<u32>,
    crash_info: Option<CrashInfo>,
    leading_cmdsize: Option<u32>,
    ncmds_extra: u32,
    sizeofcmds_override: Option<u32>,
    magic_override: Option<u32>,
}

impl MachOBuilder
{
    pub fn dylib(name: &str) -> Self
    {
        Self {
            name: name.to_string(),
            is_64: true,
            swapped: false,
            file_type: MH_DYLIB,
            cpu_type: CPU_TYPE_ARM64,
            cpu_subtype: 0,
            text: true,
            slide: 0,
            linked_at: None,
            text_size: None,
            uuid: None,
            version: None,
            crash_info: None,
            leading_cmdsize: None,
            ncmds_extra: 0,
            sizeofcmds_override: None,
            magic_override: None,
        }
    }

    pub fn executable(name: &str) -> Self
    {
        Self {
            file_type: MH_EXECUTE,
            ..Self::dylib(name)
        }
    }

    pub fn bits32(mut self) -> Self
    {
        self.is_64 = false;
        self.cpu_type = CPU_TYPE_ARM;
        self
    }

    pub fn swapped(mut self) -> Self
    {
        self.swapped = true;
        self
    }

    pub fn cpu(mut self, cpu_type: u32, cpu_subtype: u32) -> Self
    {
        self.cpu_type = cpu_type;
        self.cpu_subtype = cpu_subtype;
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self
    {
        self.uuid = Some(uuid);
        self
    }

    pub fn version(mut self, packed: u32) -> Self
    {
        self.version = Some(packed);
        self
    }

    pub fn without_text(mut self) -> Self
    {
        self.text = false;
        self
    }

    /// Link `__TEXT` at `buffer - slide`, as if the loader slid it by `slide`.
    pub fn slid_by(mut self, slide: isize) -> Self
    {
        self.slide = slide;
        self
    }

    /// Link `__TEXT` at a fixed `vmaddr`, as dylibs outside the shared
    /// cache are (usually 0). The image then needs a slide equal to
    /// `header - vmaddr` to parse cleanly.
    pub fn linked_at(mut self, vmaddr: u64) -> Self
    {
        self.linked_at = Some(vmaddr);
        self
    }

    pub fn text_size(mut self, size: u64) -> Self
    {
        self.text_size = Some(size);
        self
    }

    pub fn crash_info(mut self, info: CrashInfo) -> Self
    {
        self.crash_info = Some(info);
        self
    }

    /// Put a bogus command with this `cmdsize` before all the others.
    pub fn leading_command(mut self, cmdsize: u32) -> Self
    {
        self.leading_cmdsize = Some(cmdsize);
        self
    }

    /// Claim more load commands in `ncmds` than are present.
    pub fn extra_ncmds(mut self, extra: u32) -> Self
    {
        self.ncmds_extra = extra;
        self
    }

    pub fn sizeofcmds(mut self, sizeofcmds: u32) -> Self
    {
        self.sizeofcmds_override = Some(sizeofcmds);
        self
    }

    pub fn magic(mut self, magic: u32) -> Self
    {
        self.magic_override = Some(magic);
        self
    }

    fn pointer_width(&self) -> u64
    {
        if self.is_64 { 8 } else { 4 }
    }

    fn header_size(&self) -> u64
    {
        if self.is_64 { 32 } else { 28 }
    }

    fn segment_size(&self) -> u64
    {
        if self.is_64 { 72 } else { 56 }
    }

    fn section_size(&self) -> u64
    {
        if self.is_64 { 80 } else { 68 }
    }

    fn commands_size(&self) -> u64
    {
        let mut size = 0;
        if self.leading_cmdsize.is_some() {
            size += 8;
        }
        if self.text {
            size += self.segment_size();
        }
        if self.crash_info.is_some() {
            size += self.segment_size() + self.section_size();
        }
        if self.uuid.is_some() {
            size += 24;
        }
        if self.version.is_some() {
            size += 24 + DYLIB_NAME.len() as u64;
        }
        size
    }

    fn command_count(&self) -> u32
    {
        [
            self.leading_cmdsize.is_some(),
            self.text,
            self.crash_info.is_some(),
            self.uuid.is_some(),
            self.version.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count() as u32
    }

    /// Lay the image out in leaked memory, register it with `fixture`
    /// under its name, and return where it lives.
    pub fn build(self, fixture: &Fixture) -> TestImage
    {
        let width = self.pointer_width();
        let record_offset = (self.header_size() + self.commands_size()).next_multiple_of(16);
        let record_size = width * 8;
        let len = (record_offset + record_size).next_multiple_of(16).max(0x100);

        let storage: &'static mut [u64] = Box::leak(vec![0u64; (len / 8) as usize].into_boxed_slice());
        let base = storage.as_mut_ptr() as usize as u64;
        let linked = self
            .linked_at
            .unwrap_or_else(|| base.wrapping_add_signed(-(self.slide as i64)));

        let mut out = Writer::new(self.swapped);
        out.u32(self.magic_override.unwrap_or(if self.is_64 { MH_MAGIC_64 } else { MH_MAGIC }));
        out.u32(self.cpu_type);
        out.u32(self.cpu_subtype);
        out.u32(self.file_type);
        out.u32(self.command_count() + self.ncmds_extra);
        out.u32(self.sizeofcmds_override.unwrap_or(self.commands_size() as u32));
        out.u32(0); // flags
        if self.is_64 {
            out.u32(0); // reserved
        }

        if let Some(cmdsize) = self.leading_cmdsize {
            out.u32(0x7fff_0000);
            out.u32(cmdsize);
        }
        if self.text {
            let size = self.text_size.unwrap_or(len);
            self.segment(&mut out, b"__TEXT", linked, size, 0);
        }
        if let Some(info) = &self.crash_info {
            let record_linked = linked + record_offset;
            self.segment(&mut out, b"__DATA", record_linked, record_size, 1);
            out.name(b"__crash_info");
            out.name(b"__DATA");
            let section_size = info.section_size.unwrap_or(record_size);
            if self.is_64 {
                out.u64(record_linked);
                out.u64(section_size);
            } else {
                out.u32(record_linked as u32);
                out.u32(section_size as u32);
            }
            // offset, align, reloff, nreloc, flags, reserved1, reserved2 (+ reserved3)
            let trailing = if self.is_64 { 8 } else { 7 };
            for _ in 0..trailing {
                out.u32(0);
            }
        }
        if let Some(uuid) = self.uuid {
            out.u32(LC_UUID);
            out.u32(24);
            out.bytes(&uuid);
        }
        if let Some(version) = self.version {
            out.u32(LC_ID_DYLIB);
            out.u32(24 + DYLIB_NAME.len() as u32);
            out.u32(24); // name offset
            out.u32(2); // timestamp
            out.u32(version);
            out.u32(0x0001_0000); // compatibility version
            out.bytes(DYLIB_NAME);
        }

        out.pad_to(record_offset as usize);
        if let Some(info) = &self.crash_info {
            // The record is read in native byte order.
            let mut record = Writer::new(false);
            record.u32(info.version);
            record.pad_to(width as usize);
            for field in [info.message, info.signature, info.backtrace, info.message2] {
                let value = match field {
                    Field::Null => 0,
                    Field::Text(text) => fixture.c_string(text),
                    Field::Raw(value) => value,
                };
                if self.is_64 {
                    record.u64(value);
                } else {
                    record.u32(value as u32);
                }
            }
            out.bytes(&record.into_inner());
        }

        let bytes = out.into_inner();
        assert!(bytes.len() as u64 <= len);
        // SAFETY: `storage` is `len` bytes of leaked, writable memory.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), storage.as_mut_ptr().cast::<u8>(), bytes.len()) };

        let header = Address::new(base);
        fixture.add_region(base, len);
        fixture.set_name(header, &self.name);
        TestImage { header, len }
    }

    fn segment(&self, out: &mut Writer, name: &[u8], vmaddr: u64, vmsize: u64, nsects: u32)
    {
        let cmdsize = self.segment_size() + u64::from(nsects) * self.section_size();
        out.u32(if self.is_64 { LC_SEGMENT_64 } else { LC_SEGMENT });
        out.u32(cmdsize as u32);
        out.name(name);
        if self.is_64 {
            out.u64(vmaddr);
            out.u64(vmsize);
            out.u64(0); // fileoff
            out.u64(vmsize); // filesize
        } else {
            out.u32(vmaddr as u32);
            out.u32(vmsize as u32);
            out.u32(0);
            out.u32(vmsize as u32);
        }
        out.u32(5); // maxprot
        out.u32(5); // initprot
        out.u32(nsects);
        out.u32(0); // flags
    }
}

struct Writer
{
    out: Vec<u8>,
    swapped: bool,
}

impl Writer
{
    fn new(swapped: bool) -> Self
    {
        Self { out: Vec::new(), swapped }
    }

    fn u32(&mut self, value: u32)
    {
        let value = if self.swapped { value.swap_bytes() } else { value };
        self.out.extend_from_slice(&value.to_ne_bytes());
    }

    fn u64(&mut self, value: u64)
    {
        let value = if self.swapped { value.swap_bytes() } else { value };
        self.out.extend_from_slice(&value.to_ne_bytes());
    }

    fn name(&mut self, name: &[u8])
    {
        let mut raw = [0u8; 16];
        raw[..name.len()].copy_from_slice(name);
        self.out.extend_from_slice(&raw);
    }

    fn bytes(&mut self, bytes: &[u8])
    {
        self.out.extend_from_slice(bytes);
    }

    fn pad_to(&mut self, len: usize)
    {
        if self.out.len() < len {
            self.out.resize(len, 0);
        }
    }

    fn into_inner(self) -> Vec<u8>
    {
        self.out
    }
}
