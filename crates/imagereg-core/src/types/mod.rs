//! # Types
//!
//! Small value types shared by the parser and the registry.
//!
//! These carry no behaviour beyond decoding and formatting, so they are safe
//! to copy out of a registry entry and hand to report builders.

pub mod address;
pub mod arch;
pub mod build_id;
pub mod version;

// Re-export all public types
pub use address::{Address, AddressRange};
pub use arch::Architecture;
pub use build_id::BuildId;
pub use version::ImageVersion;
