//! # Safe Memory Probe
//!
//! Bounded readability checks for pointers the registry did not allocate.
//!
//! Mach-O headers, load commands and `__crash_info` strings all live in
//! memory owned by the loader or by other images. During a crash any of them
//! may be stale or corrupt, and the code reading them may be running inside a
//! signal handler where a second fault kills the report. Every such read goes
//! through a [`MemoryProbe`] first.
//!
//! The system probe asks the kernel to copy the bytes rather than touching
//! them directly, so an unmapped page shows up as a short count instead of a
//! `SIGSEGV`. It never allocates and never takes a lock.

use std::slice;

use crate::types::Address;

/// Chunk size for kernel-assisted probing.
///
/// Chunks never straddle a 4 KiB boundary, so they never straddle a page
/// boundary on any supported page size.
pub(crate) const PROBE_CHUNK: usize = 4096;

/// Bounded readability check
///
/// Implementations must be async-signal-safe: no allocation, no locks.
///
/// ## Safety
///
/// Every byte in the prefix reported by
/// [`max_readable_bytes`](Self::max_readable_bytes) must really be mapped
/// and readable when the call returns. The helpers in this module, the
/// header parser and the `__crash_info` reader turn that prefix into a
/// slice without further checks, so over-reporting is undefined behavior.
///
/// An implementation without `unsafe impl` is rejected:
///
/// ```compile_fail
/// use imagereg_core::probe::MemoryProbe;
/// use imagereg_core::types::Address;
///
/// struct Everything;
///
/// impl MemoryProbe for Everything
/// {
///     fn max_readable_bytes(&self, _address: Address, max_len: usize) -> usize
///     {
///         max_len
///     }
/// }
/// ```
pub unsafe trait MemoryProbe: Sync
{
    /// How many bytes starting at `address` can be read, up to `max_len`.
    ///
    /// Returns `0` for null or unmapped addresses. The result is a prefix
    /// length: byte `n` is only counted if bytes `0..n` were readable too.
    fn max_readable_bytes(&self, address: Address, max_len: usize) -> usize;
}

/// Whether all `len` bytes at `address` are readable.
pub fn is_readable(probe: &dyn MemoryProbe, address: Address, len: usize) -> bool
{
    len == 0 || probe.max_readable_bytes(address, len) == len
}

/// Borrow `len` bytes at `address` once the probe has vouched for them.
///
/// Returns `None` if any byte in the range is unreadable.
///
/// ## Safety
///
/// The probe only proves the range was mapped at the time of the call. The
/// caller must ensure the mapping outlives `'a`. Image headers satisfy this
/// for as long as the image stays loaded, which is why the registry only
/// re-reads headers of images that are not marked unloaded.
pub unsafe fn readable_slice<'a>(probe: &dyn MemoryProbe, address: Address, len: usize) -> Option<&'a [u8]>
{
    if address.is_null() || !is_readable(probe, address, len) {
        return None;
    }
    // SAFETY: the probe confirmed `len` readable bytes; lifetime is the caller's contract.
    Some(unsafe { slice::from_raw_parts(address.as_ptr().cast::<u8>(), len) })
}

/// Length of the NUL-terminated string at `address`, if one ends within
/// `max_len` readable bytes.
///
/// A string that runs off the end of readable memory, or past `max_len`
/// bytes without a terminator, is rejected.
pub fn c_string_len(probe: &dyn MemoryProbe, address: Address, max_len: usize) -> Option<usize>
{
    if address.is_null() {
        return None;
    }
    let readable = probe.max_readable_bytes(address, max_len);
    if readable == 0 {
        return None;
    }
    // SAFETY: exactly `readable` bytes were just confirmed readable.
    let bytes = unsafe { slice::from_raw_parts(address.as_ptr().cast::<u8>(), readable) };
    bytes.iter().position(|&b| b == 0)
}

/// Copy the NUL-terminated string at `address` if it passes [`c_string_len`].
///
/// Invalid UTF-8 is replaced rather than rejected; these strings end up in a
/// crash report verbatim.
pub fn read_c_string(probe: &dyn MemoryProbe, address: Address, max_len: usize) -> Option<String>
{
    let len = c_string_len(probe, address, max_len)?;
    // SAFETY: `c_string_len` just probed these bytes plus the terminator.
    let bytes = unsafe { slice::from_raw_parts(address.as_ptr().cast::<u8>(), len) };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Drive a kernel copy primitive across `[address, address + max_len)`.
///
/// `read_chunk` receives the source address and a scratch buffer sized to
/// the chunk; it returns how many bytes it managed to copy, or `None` on
/// failure. Probing stops at the first short or failed chunk.
pub(crate) fn probe_in_chunks<F>(address: Address, max_len: usize, mut read_chunk: F) -> usize
where
    F: FnMut(u64, &mut [u8]) -> Option<usize>,
{
    if address.is_null() || max_len == 0 {
        return 0;
    }

    let mut scratch = [0u8; PROBE_CHUNK];
    let mut total = 0usize;
    while total < max_len {
        let Some(cursor) = address.checked_add(total as u64) else {
            break;
        };
        let cursor = cursor.value();
        let window = PROBE_CHUNK - (cursor % PROBE_CHUNK as u64) as usize;
        let chunk = window.min(max_len - total);

        match read_chunk(cursor, &mut scratch[..chunk]) {
            Some(copied) if copied > 0 => {
                total += copied.min(chunk);
                if copied < chunk {
                    break;
                }
            }
            _ => break,
        }
    }
    total
}
