//! Packed dylib version numbers.

use std::fmt;

/// Version of an image as recorded in its `LC_ID_DYLIB` command
///
/// dyld packs the version as `xxxx.yy.zz` into a single `u32`: the upper 16
/// bits are the major version, then 8 bits each for minor and revision.
/// Executables and bundles carry no `LC_ID_DYLIB` and report `0.0.0`.
///
/// ```rust
/// use imagereg_core::types::ImageVersion;
///
/// let version = ImageVersion::from_packed(0x0005_0a03);
/// assert_eq!((version.major, version.minor, version.revision), (5, 10, 3));
/// assert_eq!(version.to_string(), "5.10.3");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageVersion
{
    pub major: u64,
    pub minor: u64,
    pub revision: u64,
}

impl ImageVersion
{
    /// Decode the packed `current_version` field of a dylib command.
    pub const fn from_packed(packed: u32) -> Self
    {
        let packed = packed as u64;
        Self {
            major: packed >> 16,
            minor: (packed >> 8) & 0xff,
            revision: packed & 0xff,
        }
    }
}

impl From<u32> for ImageVersion
{
    fn from(packed: u32) -> Self
    {
        Self::from_packed(packed)
    }
}

impl fmt::Display for ImageVersion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}
