//! # Embedded Diagnostic Records
//!
//! Reading of the `__DATA,__crash_info` section.
//!
//! libSystem and a few other Apple libraries fill in a small record before
//! calling `abort()` (assertion text, a reason string, sometimes a
//! backtrace). The record is a versioned C struct full of raw `char *`
//! pointers, so every pointer is validated through the probe before a single
//! byte of the string is trusted.
//!
//! Layout (`#pragma pack(8)`, `p` = pointer width of the image):
//!
//! | offset | field       |
//! |--------|-------------|
//! | 0      | `version`   |
//! | 1p     | `message`   |
//! | 2p     | `signature` |
//! | 3p     | `backtrace` |
//! | 4p     | `message2`  |
//! | 5p     | `reserved`  |

use tracing::{debug, trace};

use crate::error::DiagnosticError;
use crate::probe::{is_readable, read_c_string, readable_slice, MemoryProbe};
use crate::types::Address;

/// Longest string accepted from a crash info record, excluding the NUL.
pub const MAX_DIAGNOSTIC_STRING_LEN: usize = 4096;

/// Record layout versions we know how to read.
const SUPPORTED_VERSIONS: [u32; 2] = [4, 5];

/// Index of each pointer field after the leading `version` word.
const MESSAGE: usize = 0;
const SIGNATURE: usize = 1;
const BACKTRACE: usize = 2;
const MESSAGE2: usize = 3;
/// First field we do not need; everything before it must be present.
const RESERVED: usize = 4;

/// Strings recovered from an image's `__crash_info` section
///
/// Each field is independently optional: a field whose pointer is null,
/// unreadable or not terminated within [`MAX_DIAGNOSTIC_STRING_LEN`] bytes is
/// left as `None` without affecting the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticRecord
{
    pub message: Option<String>,
    pub message2: Option<String>,
    pub backtrace: Option<String>,
    pub signature: Option<String>,
}

impl DiagnosticRecord
{
    /// Whether no field survived validation.
    pub fn is_empty(&self) -> bool
    {
        self.message.is_none() && self.message2.is_none() && self.backtrace.is_none() && self.signature.is_none()
    }
}

/// Where the `__crash_info` section of an image ended up in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashInfoSection
{
    /// Runtime address (`section.addr + slide`)
    pub address: Address,
    /// Advertised section size
    pub size: u64,
}

/// Pointer width of the image the record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth
{
    Four,
    Eight,
}

impl PointerWidth
{
    const fn bytes(self) -> usize
    {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }

    /// Offset of pointer field `index` within the record.
    const fn field_offset(self, index: usize) -> usize
    {
        self.bytes() * (index + 1)
    }

    fn read(self, bytes: &[u8], index: usize) -> Address
    {
        let offset = self.field_offset(index);
        match self {
            PointerWidth::Four => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes[offset..offset + 4]);
                Address::from(u64::from(u32::from_ne_bytes(raw)))
            }
            PointerWidth::Eight => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[offset..offset + 8]);
                Address::from(u64::from_ne_bytes(raw))
            }
        }
    }
}

/// Read and validate the record at `section`.
///
/// The record header must be fully readable, of a known version and carry at
/// least one message pointer; otherwise the whole record is rejected. Past
/// that point individual bad strings are dropped, not the record.
pub fn read_crash_info(
    probe: &dyn MemoryProbe,
    section: CrashInfoSection,
    width: PointerWidth,
) -> Result<DiagnosticRecord, DiagnosticError>
{
    let required = width.field_offset(RESERVED);
    if section.size < required as u64 {
        return Err(DiagnosticError::TooSmall {
            size: section.size,
            required: required as u64,
        });
    }
    if !is_readable(probe, section.address, required) {
        return Err(DiagnosticError::Unreadable(section.address));
    }
    // SAFETY: just probed; the section lives as long as its image is loaded.
    let bytes = unsafe { readable_slice(probe, section.address, required) }
        .ok_or(DiagnosticError::Unreadable(section.address))?;

    let mut raw_version = [0u8; 4];
    raw_version.copy_from_slice(&bytes[..4]);
    let version = u32::from_ne_bytes(raw_version);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(DiagnosticError::UnsupportedVersion(version));
    }

    let message = width.read(bytes, MESSAGE);
    let message2 = width.read(bytes, MESSAGE2);
    if message.is_null() && message2.is_null() {
        return Err(DiagnosticError::NoMessages);
    }

    let record = DiagnosticRecord {
        message: string_field(probe, "message", message),
        message2: string_field(probe, "message2", message2),
        backtrace: string_field(probe, "backtrace", width.read(bytes, BACKTRACE)),
        signature: string_field(probe, "signature", width.read(bytes, SIGNATURE)),
    };
    Ok(record)
}

fn string_field(probe: &dyn MemoryProbe, field: &'static str, address: Address) -> Option<String>
{
    if address.is_null() {
        return None;
    }
    let value = read_c_string(probe, address, MAX_DIAGNOSTIC_STRING_LEN + 1);
    match &value {
        Some(text) => debug!(field, value = %text, "found crash info string"),
        None => trace!(field, %address, "skipping crash info string: unreadable or unterminated"),
    }
    value
}
