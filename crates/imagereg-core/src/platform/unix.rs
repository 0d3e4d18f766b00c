//! `dladdr`-based module lookup shared by every Unix target.

use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::sync::OnceLock;

use crate::types::Address;

fn dladdr(address: Address) -> Option<libc::Dl_info>
{
    let mut info = MaybeUninit::<libc::Dl_info>::zeroed();
    // SAFETY: dladdr only inspects the loader's own tables; the address is never dereferenced.
    let found = unsafe { libc::dladdr(address.as_ptr(), info.as_mut_ptr()) };
    if found == 0 {
        return None;
    }
    // SAFETY: a non-zero return means dladdr filled in the structure.
    Some(unsafe { info.assume_init() })
}

/// Path of the module containing `address`.
pub(crate) fn dladdr_path(address: Address) -> Option<String>
{
    let info = dladdr(address)?;
    if info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: dli_fname points at a loader-owned C string that lives as long as the module.
    let path = unsafe { CStr::from_ptr(info.dli_fname) };
    Some(path.to_string_lossy().into_owned())
}

/// Base (header) address of the module this crate is linked into.
///
/// On Apple platforms this is the same value as `&__dso_handle`. Looked up
/// once; every image load compares against it.
pub(crate) fn own_image_base() -> Option<Address>
{
    static OWN_BASE: OnceLock<Option<Address>> = OnceLock::new();
    *OWN_BASE.get_or_init(lookup_own_image_base)
}

fn lookup_own_image_base() -> Option<Address>
{
    let marker = own_image_base as fn() -> Option<Address>;
    let info = dladdr(Address::from(marker as usize))?;
    if info.dli_fbase.is_null() {
        return None;
    }
    Some(Address::from_ptr(info.dli_fbase))
}
