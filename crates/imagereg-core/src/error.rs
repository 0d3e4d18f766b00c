//! # Error Types
//!
//! Failures inside the image registry never reach the registry's callers:
//! a crash reporter must not itself fail while collecting crash data. The
//! errors here exist so that the parser can say *why* it gave up, and so the
//! registry can log that reason before dropping the event.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and messages.

use thiserror::Error;

use crate::types::Address;

/// Why a Mach-O header could not be turned into a registry entry
///
/// Any of these causes the load event to be dropped. No partial entry is
/// ever published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError
{
    /// The loader handed us a null header pointer
    #[error("Mach-O header pointer is null")]
    NullHeader,

    /// The header (or its fixed-size prefix) is not mapped readable
    #[error("Mach-O header at {0} is not readable")]
    Unreadable(Address),

    /// The first word of the header is not a Mach-O magic number
    ///
    /// Universal (fat) headers land here too: dyld only ever maps a single
    /// architecture slice, so a fat header in memory means corruption.
    #[error("Unrecognized Mach-O magic 0x{magic:08x} at {address}")]
    UnknownMagic
    {
        /// Header address
        address: Address,
        /// The word that was found instead
        magic: u32,
    },

    /// Neither the platform lookup nor dyld's own tables know this image
    ///
    /// Running under a debugger is the usual way to hit this.
    #[error("No path could be resolved for the image at {0}")]
    NoName(Address),
}

/// Why an embedded `__crash_info` record was ignored
///
/// The record is optional decoration on an image. Rejecting it leaves the
/// rest of the image entry intact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticError
{
    /// The section is smaller than the fixed prefix we need to read
    #[error("crash info section is too small: {size} < {required} bytes")]
    TooSmall
    {
        /// Advertised section size
        size: u64,
        /// Bytes needed up to the first reserved field
        required: u64,
    },

    /// The record prefix is not mapped readable
    #[error("crash info record at {0} is not readable")]
    Unreadable(Address),

    /// Only versions 4 and 5 of the record layout are understood
    #[error("unsupported crash info version {0}")]
    UnsupportedVersion(u32),

    /// Both message pointers are null
    #[error("crash info record carries no message")]
    NoMessages,
}

/// Convenience type alias for `Result<T, ParseError>`
///
/// ```rust
/// use imagereg_core::error::ParseResult;
/// fn foo() -> ParseResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type ParseResult<T> = std::result::Result<T, ParseError>;
