//! # dyld FFI Declarations
//!
//! `extern "C"` declarations for the dyld and Mach entry points the registry
//! needs that neither `libc` nor `mach2` expose in the shape we want, plus
//! the `#[repr(C)]` prefix of dyld's `dyld_all_image_infos` structure.
//!
//! ## References
//!
//! - `<mach-o/dyld.h>`
//! - `<mach-o/dyld_images.h>`
//! - `<mach/task_info.h>`

// Allow doc comments in extern blocks - they're useful for developers even if rustdoc doesn't generate docs
#![allow(unused_doc_comments)]

use libc::{c_char, c_void, integer_t, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, uintptr_t};

/// Signature of the callbacks dyld invokes on image load and unload.
pub type DyldImageCallback = extern "C" fn(header: *const c_void, vmaddr_slide: isize);

/// `task_info` flavor returning the address of `dyld_all_image_infos`.
pub const TASK_DYLD_INFO: u32 = 17;

/// Reply structure for `TASK_DYLD_INFO` (`task_dyld_info_data_t`).
///
/// `<mach/task_info.h>` declares it under `#pragma pack(4)`.
#[repr(C, packed(4))]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskDyldInfo
{
    /// Address of dyld's `dyld_all_image_infos`
    pub all_image_info_addr: u64,
    /// Size of that structure
    pub all_image_info_size: u64,
    /// `TASK_DYLD_ALL_IMAGE_INFO_32` or `_64`
    pub all_image_info_format: integer_t,
}

/// `TASK_DYLD_INFO_COUNT`: the reply size in `natural_t` units.
pub const TASK_DYLD_INFO_COUNT: mach_msg_type_number_t =
    (std::mem::size_of::<TaskDyldInfo>() / std::mem::size_of::<natural_t>()) as mach_msg_type_number_t;

/// One entry of `dyld_all_image_infos.infoArray`.
#[repr(C)]
#[derive(Debug)]
pub struct DyldImageInfo
{
    pub image_load_address: *const c_void,
    pub image_file_path: *const c_char,
    pub image_file_mod_date: uintptr_t,
}

/// Leading fields of `struct dyld_all_image_infos`.
///
/// Only the prefix up to `dyldPath` (present since version 15) is declared;
/// later fields are never read.
#[repr(C)]
#[derive(Debug)]
pub struct DyldAllImageInfos
{
    pub version: u32,
    pub info_array_count: u32,
    pub info_array: *const DyldImageInfo,
    pub notification: *const c_void,
    pub process_detached_from_shared_region: bool,
    pub lib_system_initialized: bool,
    pub dyld_image_load_address: *const c_void,
    pub jit_info: *const c_void,
    pub dyld_version: *const c_char,
    pub error_message: *const c_char,
    pub termination_flags: uintptr_t,
    pub core_symbolication_shm_page: *const c_void,
    pub system_order_flag: uintptr_t,
    pub uuid_array_count: uintptr_t,
    pub uuid_array: *const c_void,
    pub dyld_all_image_infos_address: *const c_void,
    pub initial_image_count: uintptr_t,
    pub error_kind: uintptr_t,
    pub error_client_of_dylib_path: *const c_char,
    pub error_target_dylib_path: *const c_char,
    pub error_symbol: *const c_char,
    pub shared_cache_slide: uintptr_t,
    pub shared_cache_uuid: [u8; 16],
    pub shared_cache_base_address: uintptr_t,
    pub info_array_change_timestamp: u64,
    pub dyld_path: *const c_char,
}

/// First `dyld_all_image_infos.version` that carries `dyldPath`.
pub const DYLD_PATH_MIN_VERSION: u32 = 15;

#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Register a callback for image loads.
    ///
    /// dyld calls it synchronously for every image already loaded, then for
    /// each future load. Registration cannot be undone.
    pub fn _dyld_register_func_for_add_image(func: DyldImageCallback);

    /// Register a callback for image unloads.
    pub fn _dyld_register_func_for_remove_image(func: DyldImageCallback);

    /// Number of images currently in dyld's list (a hint; may race with loads).
    pub fn _dyld_image_count() -> u32;

    /// Header of image `index`, or null if out of range.
    pub fn _dyld_get_image_header(index: u32) -> *const c_void;

    /// Slide of image `index`, or 0 if out of range.
    pub fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;

    /// Query task information.
    ///
    /// Declared here rather than taken from `mach2` so the flavor and reply
    /// structure above can be passed without casts through `task_info_t`.
    pub fn task_info(
        target_task: mach_port_t,
        flavor: u32,
        task_info_out: *mut TaskDyldInfo,
        task_info_out_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
}
