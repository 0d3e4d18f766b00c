//! Memory address type.

use std::ffi::c_void;
use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address inside the current process
///
/// Image headers, segment addresses and embedded string pointers are all
/// plain integers once they leave the loader. Wrapping them keeps sizes,
/// slides and addresses from being mixed up, and keeps pointer conversions in
/// one place.
///
/// ## Example
///
/// ```rust
/// use imagereg_core::types::Address;
///
/// let header = Address::new(0x1_0000_0000);
/// let linked = Address::new(0x1_0000_0000);
/// assert_eq!(linked.apply_slide(0x4000), header + 0x4000);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Address of a pointer in this process.
    pub fn from_ptr<T>(ptr: *const T) -> Self
    {
        Address(ptr as usize as u64)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Reinterpret the address as a raw pointer in this process.
    ///
    /// Dereferencing the result is only sound once the range has been bounded
    /// by a [`MemoryProbe`](crate::probe::MemoryProbe).
    pub fn as_ptr(self) -> *const c_void
    {
        self.0 as usize as *const c_void
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use imagereg_core::types::Address;
    ///
    /// let addr = Address::new(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::new(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Relocate a link-time address by a loader slide.
    ///
    /// Slides are signed and the arithmetic wraps, matching how the loader
    /// itself computes `vmaddr + slide`.
    pub const fn apply_slide(self, slide: isize) -> Self
    {
        Address(self.0.wrapping_add_signed(slide as i64))
    }

    /// Slide that relocates `linked` to `self`.
    pub const fn slide_from(self, linked: Address) -> isize
    {
        self.0.wrapping_sub(linked.0) as i64 as isize
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<usize> for Address
{
    fn from(value: usize) -> Self
    {
        Address(value as u64)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

/// Half-open address range `[start, end)`.
///
/// An image with a zero-sized `__TEXT` segment has an empty range and never
/// contains any address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange
{
    /// First address in the range
    pub start: Address,
    /// One past the last address, saturated at `u64::MAX`
    pub end: Address,
}

impl AddressRange
{
    /// Range covering `size` bytes starting at `start`.
    pub fn new(start: Address, size: u64) -> Self
    {
        Self {
            start,
            end: Address(start.0.saturating_add(size)),
        }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64
    {
        self.end.0 - self.start.0
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Whether `address` falls inside the range.
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }
}

impl fmt::Display for AddressRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} - {}", self.start, self.end)
    }
}
