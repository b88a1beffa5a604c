use core::ffi::c_void;
use std::mem::offset_of;

use cef_capi::cef_base_ref_counted_t;

/// Layout of the engine's own C-to-C++ wrapper structs.
///
/// When the engine hands out a pointer to one of its objects it allocates a
/// small shim holding a type tag, the C++ object pointer, and then the
/// counted struct whose address the caller actually sees. Reading back
/// through that shim recovers the C++ object pointer, which is a stabler
/// identity key than the struct address: the engine is free to allocate a
/// new shim for the same object on every call.
#[repr(C)]
pub(crate) struct RefCountedWrapperStruct {
    pub(crate) wrapper_type: usize,
    pub(crate) engine_object: *mut c_void,
    pub(crate) counted: cef_base_ref_counted_t,
}

impl RefCountedWrapperStruct {
    /// Walks back from a counted struct to its containing shim.
    ///
    /// # Safety
    /// `counted` must point into an engine allocated shim of this layout.
    /// Structs the bridge allocated itself have no shim in front of them;
    /// calling this on one reads out of bounds.
    pub(crate) unsafe fn from_counted(
        counted: *mut cef_base_ref_counted_t,
    ) -> *mut RefCountedWrapperStruct {
        let offset = offset_of!(RefCountedWrapperStruct, counted);
        unsafe { counted.byte_sub(offset) as *mut RefCountedWrapperStruct }
    }

    /// Identity key for the C++ object behind `counted`, or `None` when the
    /// shim holds a null object pointer.
    ///
    /// # Safety
    /// Same requirement as [`Self::from_counted`].
    pub(crate) unsafe fn engine_key(counted: *mut cef_base_ref_counted_t) -> Option<usize> {
        let shim = unsafe { Self::from_counted(counted) };
        let object = unsafe { (*shim).engine_object };
        if object.is_null() {
            None
        } else {
            Some(object as usize)
        }
    }
}
