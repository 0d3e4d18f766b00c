//! Tests for platform-agnostic types

use imagereg_core::types::{Address, AddressRange, Architecture, BuildId, ImageVersion};
use object::macho::{CPU_SUBTYPE_ARM64E, CPU_SUBTYPE_LIB64, CPU_TYPE_ARM64, CPU_TYPE_ARM64_32, CPU_TYPE_X86, CPU_TYPE_X86_64};

#[test]
fn test_address_display_is_zero_padded_hex()
{
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    assert_eq!(Address::ZERO.to_string(), "0x0000000000000000");
}

#[test]
fn test_address_conversions()
{
    let address = Address::from(0x7fff_0000_u64);
    assert_eq!(address.value(), 0x7fff_0000);
    assert_eq!(u64::from(address), 0x7fff_0000);
    assert_eq!(Address::from(16_usize), Address::new(16));
    assert!(Address::ZERO.is_null());
    assert!(!address.is_null());
}

#[test]
fn test_address_slide_arithmetic()
{
    let linked = Address::new(0x1_0000_0000);
    let loaded = Address::new(0x1_0000_8000);

    assert_eq!(linked.apply_slide(0x8000), loaded);
    assert_eq!(loaded.apply_slide(-0x8000), linked);
    assert_eq!(loaded.slide_from(linked), 0x8000);
    assert_eq!(linked.slide_from(loaded), -0x8000);
}

#[test]
fn test_address_checked_add()
{
    assert_eq!(Address::new(0x1000).checked_add(0x10), Some(Address::new(0x1010)));
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
}

#[test]
fn test_address_range_is_half_open()
{
    let range = AddressRange::new(Address::new(0x1000), 0x100);

    assert!(range.contains(Address::new(0x1000)));
    assert!(range.contains(Address::new(0x10ff)));
    assert!(!range.contains(Address::new(0x1100)));
    assert!(!range.contains(Address::new(0xfff)));
    assert_eq!(range.len(), 0x100);
    assert_eq!(range.to_string(), "0x0000000000001000 - 0x0000000000001100");
}

#[test]
fn test_empty_range_contains_nothing()
{
    let range = AddressRange::new(Address::new(0x1000), 0);
    assert!(range.is_empty());
    assert!(!range.contains(Address::new(0x1000)));
}

#[test]
fn test_range_saturates_at_top_of_address_space()
{
    let range = AddressRange::new(Address::new(u64::MAX - 4), 0x100);
    assert_eq!(range.end, Address::new(u64::MAX));
    assert!(range.contains(Address::new(u64::MAX - 1)));
    assert!(!range.contains(Address::new(u64::MAX)));
}

#[test]
fn test_image_version_decoding()
{
    let version = ImageVersion::from_packed(0x04d2_0a03);
    assert_eq!(version.major, 1234);
    assert_eq!(version.minor, 10);
    assert_eq!(version.revision, 3);
    assert_eq!(version.to_string(), "1234.10.3");
    assert_eq!(ImageVersion::from(0_u32).to_string(), "0.0.0");
    assert_eq!(ImageVersion::from_packed(u32::MAX).to_string(), "65535.255.255");
}

#[test]
fn test_build_id_display_matches_dsym_style()
{
    let id = BuildId::from_bytes([
        0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54, 0x32, 0x10,
    ]);
    assert_eq!(id.to_string(), "01234567-89AB-CDEF-FEDC-BA9876543210");
    assert_eq!(id.to_uuid().as_bytes(), id.as_bytes());
}

#[test]
fn test_architecture_decoding()
{
    assert_eq!(Architecture::from_cpu_type(CPU_TYPE_ARM64 as i32, 0), Architecture::Arm64);
    assert_eq!(
        Architecture::from_cpu_type(CPU_TYPE_ARM64 as i32, CPU_SUBTYPE_ARM64E as i32),
        Architecture::Arm64e
    );
    // Capability bits in the subtype do not change the architecture.
    assert_eq!(
        Architecture::from_cpu_type(CPU_TYPE_X86_64 as i32, (CPU_SUBTYPE_LIB64 | 3) as i32),
        Architecture::X86_64
    );
    assert_eq!(Architecture::from_cpu_type(CPU_TYPE_ARM64_32 as i32, 1), Architecture::Arm64_32);
    assert_eq!(Architecture::from_cpu_type(CPU_TYPE_X86 as i32, 3).to_string(), "i386");
    assert_eq!(Architecture::from_cpu_type(99, 0), Architecture::Unknown(99));
}
