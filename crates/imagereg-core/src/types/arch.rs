//! CPU architecture decoded from a Mach-O header.

use std::fmt;

use object::macho::{
    CPU_SUBTYPE_ARM64E, CPU_SUBTYPE_MASK, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_X86, CPU_TYPE_X86_64,
};

/// CPU architecture an image was built for
///
/// Crash reports name the architecture of every image next to its build
/// identifier so symbolication can pick the matching slice of a universal
/// dSYM. The raw `cputype` / `cpusubtype` pair from the header is kept on the
/// image; this enum is the human readable view of it.
///
/// ## Example
///
/// ```rust
/// use imagereg_core::types::Architecture;
///
/// let arch = Architecture::from_cpu_type(0x0100_000c, 0);
/// assert_eq!(arch, Architecture::Arm64);
/// assert_eq!(arch.to_string(), "arm64");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 64-bit ARM with pointer authentication
    Arm64e,
    /// ARM64 instruction set with 32-bit pointers (watchOS)
    Arm64_32,
    /// 32-bit ARM
    Arm,
    /// 64-bit x86
    X86_64,
    /// 32-bit x86
    X86,
    /// Anything else; the raw `cputype` is preserved
    Unknown(i32),
}

impl Architecture
{
    /// Decode a header's `cputype` / `cpusubtype` pair.
    pub fn from_cpu_type(cpu_type: i32, cpu_subtype: i32) -> Self
    {
        let subtype = (cpu_subtype as u32) & !CPU_SUBTYPE_MASK;
        match cpu_type as u32 {
            CPU_TYPE_ARM64 if subtype == CPU_SUBTYPE_ARM64E => Architecture::Arm64e,
            CPU_TYPE_ARM64 => Architecture::Arm64,
            CPU_TYPE_ARM64_32 => Architecture::Arm64_32,
            CPU_TYPE_ARM => Architecture::Arm,
            CPU_TYPE_X86_64 => Architecture::X86_64,
            CPU_TYPE_X86 => Architecture::X86,
            _ => Architecture::Unknown(cpu_type),
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Arm64e => write!(f, "arm64e"),
            Architecture::Arm64_32 => write!(f, "arm64_32"),
            Architecture::Arm => write!(f, "arm"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::X86 => write!(f, "i386"),
            Architecture::Unknown(cpu_type) => write!(f, "unknown({cpu_type:#x})"),
        }
    }
}
