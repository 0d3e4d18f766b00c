//! Tests for the process-wide registry lifecycle
//!
//! One test function: the global registry is shared by every test in the
//! binary.

use imagereg_core::global;
use imagereg_core::types::Address;

#[test]
fn test_global_lifecycle()
{
    assert!(!global::registry().is_initialized());

    global::initialize();
    global::initialize();
    assert!(global::registry().is_initialized());

    // Heap memory is not a loaded module; the lookup cannot name it.
    let not_an_image = Box::leak(Box::new([0u8; 64]));
    let before = global::registry().len();
    global::inject_load(Address::from_ptr(not_an_image.as_ptr()), 0);
    global::inject_unload(Address::from_ptr(not_an_image.as_ptr()), 0);
    assert_eq!(global::registry().len(), before);

    assert!(global::image_named("", false).is_none());
    assert!(global::build_id_of("definitely-not-loaded.dylib", true).is_none());
    assert!(global::image_at(Address::ZERO).is_none());

    #[cfg(not(target_os = "macos"))]
    {
        assert!(global::all_images().next().is_none());
        assert!(global::main_image().is_none());
        assert!(global::self_image().is_none());
    }

    // SAFETY: this is the only test in the binary; no references are held.
    unsafe { global::reset_for_tests() };
    assert!(!global::registry().is_initialized());
    assert!(global::registry().is_empty());
}
