//! Tests for error handling

use imagereg_core::error::{DiagnosticError, ParseError};
use imagereg_core::types::Address;

#[test]
fn test_parse_error_display()
{
    assert_eq!(ParseError::NullHeader.to_string(), "Mach-O header pointer is null");

    let unreadable = ParseError::Unreadable(Address::new(0x1000));
    assert_eq!(unreadable.to_string(), "Mach-O header at 0x0000000000001000 is not readable");

    let magic = ParseError::UnknownMagic {
        address: Address::new(0x2000),
        magic: 0xcafe_babe,
    };
    let message = magic.to_string();
    assert!(message.contains("0xcafebabe"));
    assert!(message.contains("0x0000000000002000"));

    assert!(ParseError::NoName(Address::new(0x3000)).to_string().contains("No path"));
}

#[test]
fn test_diagnostic_error_display()
{
    let small = DiagnosticError::TooSmall { size: 16, required: 40 };
    assert_eq!(small.to_string(), "crash info section is too small: 16 < 40 bytes");
    assert!(DiagnosticError::UnsupportedVersion(7).to_string().contains('7'));
    assert!(DiagnosticError::NoMessages.to_string().contains("no message"));
    assert!(DiagnosticError::Unreadable(Address::new(0x10))
        .to_string()
        .contains("0x0000000000000010"));
}

#[test]
fn test_errors_are_std_errors()
{
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}

    assert_error(&ParseError::NullHeader);
    assert_error(&DiagnosticError::NoMessages);

    let boxed: Box<dyn std::error::Error> = Box::new(ParseError::NullHeader);
    assert!(boxed.to_string().contains("null"));
}
