//! # Mach-O Header Parser
//!
//! Extracts what the registry needs from an image that is already mapped
//! into this process: the `__TEXT` segment bounds, the build identifier, the
//! dylib version and the optional `__crash_info` record.
//!
//! Unlike a file parser, the input is a bare header pointer handed over by
//! dyld (or by a crash handler re-reading an image). Every structure is read
//! in place through the [`MemoryProbe`], and the load-command walk is bounded
//! by both `ncmds` and `sizeofcmds`, so a corrupt header can end the walk
//! early but can never make it fault.
//!
//! The raw layouts come from `object::macho`; its `U32<E>`/`U64<E>` fields
//! are byte arrays, which lets us view unaligned memory without copying and
//! decode byte-swapped (`MH_CIGAM*`) headers with the same code.
//!
//! ## References
//!
//! - `<mach-o/loader.h>`
//! - [Mach-O file format reference](https://github.com/aidansteele/osx-abi-macho-file-format-reference)

use std::mem::size_of;

use object::endian::Endianness;
use object::macho::{
    self, DylibCommand, LoadCommand, MachHeader32, MachHeader64, Section32, Section64, SegmentCommand32,
    SegmentCommand64, UuidCommand,
};
use object::pod::{self, Pod};
use tracing::{trace, warn};

use crate::diagnostic::{read_crash_info, CrashInfoSection, DiagnosticRecord, PointerWidth};
use crate::error::{ParseError, ParseResult};
use crate::platform::ModuleLookup;
use crate::probe::{readable_slice, MemoryProbe};
use crate::types::{Address, BuildId, ImageVersion};

const TEXT_SEGMENT: &[u8] = b"__TEXT";
const DATA_SEGMENT: &[u8] = b"__DATA";
const CRASH_INFO_SECTION: &[u8] = b"__crash_info";

#[cfg(target_endian = "little")]
const NATIVE: Endianness = Endianness::Little;
#[cfg(target_endian = "little")]
const SWAPPED: Endianness = Endianness::Big;
#[cfg(target_endian = "big")]
const NATIVE: Endianness = Endianness::Big;
#[cfg(target_endian = "big")]
const SWAPPED: Endianness = Endianness::Little;

/// Link-time placement of an image's `__TEXT` segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextSegment
{
    /// `vmaddr` as linked, before slide
    pub vmaddr: Address,
    /// `vmsize`
    pub vmsize: u64,
}

/// Everything the registry stores about an image, as read from its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImage
{
    pub load_address: Address,
    pub static_address: Address,
    pub slide: isize,
    pub size: u64,
    pub name: String,
    pub build_id: Option<BuildId>,
    pub cpu_type: i32,
    pub cpu_subtype: i32,
    pub file_type: u32,
    pub version: ImageVersion,
    pub diagnostic: Option<DiagnosticRecord>,
}

/// Decoded fixed-size header.
#[derive(Debug, Clone, Copy)]
struct HeaderInfo
{
    address: Address,
    endian: Endianness,
    is_64: bool,
    cpu_type: i32,
    cpu_subtype: i32,
    file_type: u32,
    ncmds: u32,
    sizeofcmds: u32,
}

impl HeaderInfo
{
    fn header_size(&self) -> u64
    {
        if self.is_64 {
            size_of::<MachHeader64<Endianness>>() as u64
        } else {
            size_of::<MachHeader32<Endianness>>() as u64
        }
    }

    fn pointer_width(&self) -> PointerWidth
    {
        if self.is_64 {
            PointerWidth::Eight
        } else {
            PointerWidth::Four
        }
    }

    fn commands<'p>(&self, probe: &'p dyn MemoryProbe) -> LoadCommands<'p>
    {
        let start = self.address + self.header_size();
        LoadCommands {
            probe,
            endian: self.endian,
            cursor: start,
            end: start.checked_add(u64::from(self.sizeofcmds)).unwrap_or(start),
            remaining: self.ncmds,
        }
    }
}

/// One load command, viewed in place.
struct RawCommand<'p>
{
    cmd: u32,
    data: &'p [u8],
}

/// Bounded walk over a header's load commands.
///
/// Stops for good at the first command that is unreadable, shorter than a
/// `load_command`, or that would run past `sizeofcmds`.
struct LoadCommands<'p>
{
    probe: &'p dyn MemoryProbe,
    endian: Endianness,
    cursor: Address,
    end: Address,
    remaining: u32,
}

impl LoadCommands<'_>
{
    fn stop<T>(&mut self) -> Option<T>
    {
        self.remaining = 0;
        None
    }
}

impl<'p> Iterator for LoadCommands<'p>
{
    type Item = RawCommand<'p>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let Some((cmd, size)) = view::<LoadCommand<Endianness>>(self.probe, self.cursor)
            .map(|command| (command.cmd.get(self.endian), command.cmdsize.get(self.endian)))
        else {
            return self.stop();
        };

        let next = match self.cursor.checked_add(u64::from(size)) {
            Some(next) if next <= self.end && size as usize >= size_of::<LoadCommand<Endianness>>() => next,
            _ => {
                trace!(cursor = %self.cursor, cmd, size, "load command overruns sizeofcmds; stopping walk");
                return self.stop();
            }
        };

        // SAFETY: image headers stay mapped while the image is loaded.
        let Some(data) = (unsafe { readable_slice(self.probe, self.cursor, size as usize) }) else {
            return self.stop();
        };
        self.cursor = next;
        Some(RawCommand { cmd, data })
    }
}

/// Load-command facts gathered in a single walk.
#[derive(Debug, Default)]
struct CommandSummary
{
    text: Option<TextSegment>,
    build_id: Option<BuildId>,
    current_version: Option<u32>,
    crash_info: Option<(u64, u64)>,
}

/// Reads Mach-O headers of images mapped into this process
///
/// The parser holds no state of its own; the probe and lookup are injected
/// so tests can run it over synthetic images.
///
/// ## Example
///
/// ```rust,no_run
/// use imagereg_core::macho::HeaderParser;
/// use imagereg_core::platform::{SystemLookup, SystemProbe};
/// use imagereg_core::types::Address;
///
/// # let header = Address::new(0x1_0000_0000);
/// let parser = HeaderParser::new(&SystemProbe, &SystemLookup);
/// if let Ok(image) = parser.parse(header, 0) {
///     println!("{} @ {}", image.name, image.load_address);
/// }
/// ```
#[derive(Clone, Copy)]
pub struct HeaderParser<'a>
{
    probe: &'a dyn MemoryProbe,
    lookup: &'a dyn ModuleLookup,
}

impl<'a> HeaderParser<'a>
{
    pub fn new(probe: &'a dyn MemoryProbe, lookup: &'a dyn ModuleLookup) -> Self
    {
        Self { probe, lookup }
    }

    /// Read everything the registry stores about the image at `header`.
    ///
    /// ## Errors
    ///
    /// - `NullHeader` / `Unreadable` / `UnknownMagic`: not a usable header
    /// - `NoName`: the lookup could not name the image
    ///
    /// A `__TEXT` address that disagrees with `header - slide` is logged
    /// but not an error. A bad `__crash_info` record is logged and omitted.
    pub fn parse(&self, header: Address, slide: isize) -> ParseResult<ParsedImage>
    {
        let info = self.read_header(header)?;
        let name = self.lookup.path_for(header).ok_or(ParseError::NoName(header))?;
        let summary = self.summarize(&info);

        let text = summary.text.unwrap_or_default();
        if text.vmaddr.apply_slide(slide) != header {
            warn!(
                image = %name,
                %header,
                vmaddr = %text.vmaddr,
                slide,
                "Mach header != vmaddr + slide; symbolication will be compromised"
            );
        }

        let diagnostic = summary.crash_info.and_then(|(addr, size)| {
            trace!(image = %name, "found crash info section");
            let section = CrashInfoSection {
                address: Address::new(addr).apply_slide(slide),
                size,
            };
            match read_crash_info(self.probe, section, info.pointer_width()) {
                Ok(record) => Some(record),
                Err(err) => {
                    trace!(image = %name, %err, "skipped reading crash info");
                    None
                }
            }
        });

        Ok(ParsedImage {
            load_address: header,
            static_address: text.vmaddr,
            slide,
            size: text.vmsize,
            name,
            build_id: summary.build_id,
            cpu_type: info.cpu_type,
            cpu_subtype: info.cpu_subtype,
            file_type: info.file_type,
            version: summary.current_version.map(ImageVersion::from_packed).unwrap_or_default(),
            diagnostic,
        })
    }

    /// The image's `LC_UUID`, read fresh from the header.
    ///
    /// Needs no name lookup and allocates nothing.
    pub fn build_id(&self, header: Address) -> Option<BuildId>
    {
        let info = self.read_header(header).ok()?;
        info.commands(self.probe)
            .filter(|command| command.cmd == macho::LC_UUID)
            .find_map(|command| pod::from_bytes::<UuidCommand<Endianness>>(command.data).ok())
            .map(|(command, _)| BuildId::from_bytes(command.uuid))
    }

    /// The first `__TEXT` segment command, if the header has one.
    pub fn text_segment(&self, header: Address) -> ParseResult<Option<TextSegment>>
    {
        let info = self.read_header(header)?;
        let mut summary = CommandSummary::default();
        for command in info.commands(self.probe) {
            record_segment(&info, &command, &mut summary);
            if summary.text.is_some() {
                break;
            }
        }
        Ok(summary.text)
    }

    /// Slide implied by where the header sits versus where `__TEXT` was linked.
    ///
    /// Used for images the loader reports without a slide (dyld itself).
    pub fn text_slide(&self, header: Address) -> Option<isize>
    {
        let text = self.text_segment(header).ok()??;
        Some(header.slide_from(text.vmaddr))
    }

    fn read_header(&self, header: Address) -> ParseResult<HeaderInfo>
    {
        if header.is_null() {
            return Err(ParseError::NullHeader);
        }

        // SAFETY: four probed bytes at the start of a loaded image.
        let magic_bytes = unsafe { readable_slice(self.probe, header, 4) }.ok_or(ParseError::Unreadable(header))?;
        let mut raw_magic = [0u8; 4];
        raw_magic.copy_from_slice(magic_bytes);
        let magic = u32::from_ne_bytes(raw_magic);

        let (is_64, endian) = match magic {
            macho::MH_MAGIC_64 => (true, NATIVE),
            macho::MH_CIGAM_64 => (true, SWAPPED),
            macho::MH_MAGIC => (false, NATIVE),
            macho::MH_CIGAM => (false, SWAPPED),
            _ => return Err(ParseError::UnknownMagic { address: header, magic }),
        };

        let info = if is_64 {
            let raw = view::<MachHeader64<Endianness>>(self.probe, header).ok_or(ParseError::Unreadable(header))?;
            HeaderInfo {
                address: header,
                endian,
                is_64,
                cpu_type: raw.cputype.get(endian) as i32,
                cpu_subtype: raw.cpusubtype.get(endian) as i32,
                file_type: raw.filetype.get(endian),
                ncmds: raw.ncmds.get(endian),
                sizeofcmds: raw.sizeofcmds.get(endian),
            }
        } else {
            let raw = view::<MachHeader32<Endianness>>(self.probe, header).ok_or(ParseError::Unreadable(header))?;
            HeaderInfo {
                address: header,
                endian,
                is_64,
                cpu_type: raw.cputype.get(endian) as i32,
                cpu_subtype: raw.cpusubtype.get(endian) as i32,
                file_type: raw.filetype.get(endian),
                ncmds: raw.ncmds.get(endian),
                sizeofcmds: raw.sizeofcmds.get(endian),
            }
        };
        Ok(info)
    }

    fn summarize(&self, info: &HeaderInfo) -> CommandSummary
    {
        let mut summary = CommandSummary::default();
        for command in info.commands(self.probe) {
            match command.cmd {
                macho::LC_SEGMENT | macho::LC_SEGMENT_64 => record_segment(info, &command, &mut summary),
                macho::LC_UUID if summary.build_id.is_none() => {
                    if let Ok((uuid, _)) = pod::from_bytes::<UuidCommand<Endianness>>(command.data) {
                        summary.build_id = Some(BuildId::from_bytes(uuid.uuid));
                    }
                }
                macho::LC_ID_DYLIB => {
                    if let Ok((dylib, _)) = pod::from_bytes::<DylibCommand<Endianness>>(command.data) {
                        summary.current_version = Some(dylib.dylib.current_version.get(info.endian));
                    }
                }
                _ => {}
            }
        }
        summary
    }
}

/// Fold a segment command into the summary.
///
/// The first `__TEXT` segment wins. For `__DATA`, its section headers are
/// searched for `__crash_info`.
fn record_segment(info: &HeaderInfo, command: &RawCommand<'_>, summary: &mut CommandSummary)
{
    let endian = info.endian;
    match command.cmd {
        macho::LC_SEGMENT_64 => {
            let Ok((segment, sections)) = pod::from_bytes::<SegmentCommand64<Endianness>>(command.data) else {
                return;
            };
            if name_is(&segment.segname, TEXT_SEGMENT) {
                summary.text.get_or_insert(TextSegment {
                    vmaddr: Address::new(segment.vmaddr.get(endian)),
                    vmsize: segment.vmsize.get(endian),
                });
            } else if name_is(&segment.segname, DATA_SEGMENT) && summary.crash_info.is_none() {
                let count = segment.nsects.get(endian) as usize;
                if let Ok((sections, _)) = pod::slice_from_bytes::<Section64<Endianness>>(sections, count) {
                    summary.crash_info = sections
                        .iter()
                        .find(|section| name_is(&section.sectname, CRASH_INFO_SECTION))
                        .map(|section| (section.addr.get(endian), section.size.get(endian)));
                }
            }
        }
        macho::LC_SEGMENT => {
            let Ok((segment, sections)) = pod::from_bytes::<SegmentCommand32<Endianness>>(command.data) else {
                return;
            };
            if name_is(&segment.segname, TEXT_SEGMENT) {
                summary.text.get_or_insert(TextSegment {
                    vmaddr: Address::new(u64::from(segment.vmaddr.get(endian))),
                    vmsize: u64::from(segment.vmsize.get(endian)),
                });
            } else if name_is(&segment.segname, DATA_SEGMENT) && summary.crash_info.is_none() {
                let count = segment.nsects.get(endian) as usize;
                if let Ok((sections, _)) = pod::slice_from_bytes::<Section32<Endianness>>(sections, count) {
                    summary.crash_info = sections
                        .iter()
                        .find(|section| name_is(&section.sectname, CRASH_INFO_SECTION))
                        .map(|section| (u64::from(section.addr.get(endian)), u64::from(section.size.get(endian))));
                }
            }
        }
        _ => {}
    }
}

/// Compare a fixed 16-byte, NUL-padded Mach-O name.
fn name_is(raw: &[u8; 16], expected: &[u8]) -> bool
{
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    &raw[..len] == expected
}

/// Probe and view a `Pod` structure at `address`.
fn view<'p, T: Pod>(probe: &dyn MemoryProbe, address: Address) -> Option<&'p T>
{
    // SAFETY: the probed structure belongs to a loaded image.
    let bytes = unsafe { readable_slice(probe, address, size_of::<T>()) }?;
    pod::from_bytes::<T>(bytes).ok().map(|(value, _)| value)
}
