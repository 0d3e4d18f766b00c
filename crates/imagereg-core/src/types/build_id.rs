//! Build identifiers (`LC_UUID`).

use std::fmt;

use uuid::Uuid;

/// 16-byte identifier linking an image to its offline debug symbols
///
/// The linker writes a fresh UUID into every Mach-O it produces; dSYM bundles
/// carry the same value, so it is the key symbolication uses to pair a
/// crashed image with its symbols.
///
/// Displayed the way Apple tools print it: upper-case and hyphenated.
///
/// ```rust
/// use imagereg_core::types::BuildId;
///
/// let id = BuildId::from_bytes([0xab; 16]);
/// assert_eq!(id.to_string(), "ABABABAB-ABAB-ABAB-ABAB-ABABABABABAB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId([u8; 16]);

impl BuildId
{
    /// Wrap the raw bytes of an `LC_UUID` command.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self
    {
        BuildId(bytes)
    }

    /// Raw bytes in header order.
    pub const fn as_bytes(&self) -> &[u8; 16]
    {
        &self.0
    }

    /// The identifier as a [`Uuid`].
    pub const fn to_uuid(self) -> Uuid
    {
        Uuid::from_bytes(self.0)
    }
}

impl From<[u8; 16]> for BuildId
{
    fn from(bytes: [u8; 16]) -> Self
    {
        BuildId(bytes)
    }
}

impl fmt::Display for BuildId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut buffer = Uuid::encode_buffer();
        f.write_str(self.to_uuid().as_hyphenated().encode_upper(&mut buffer))
    }
}
