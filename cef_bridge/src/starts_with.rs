use cef_capi::{
    cef_base_ref_counted_t, cef_base_scoped_t, cef_request_context_t, cef_task_t, cef_v8context_t,
};

/// Marker for `#[repr(C)]` structs that begin with a `T`, so a pointer to
/// the struct is also a valid pointer to `T`.
///
/// # Safety
/// `T` must be the first field of `Self`, and `Self` must use `repr(C)`.
pub unsafe trait StartsWith<T> {}

// The base headers begin themselves, so the lifetime machinery can be used
// on a bare header pointer.
unsafe impl StartsWith<cef_base_ref_counted_t> for cef_base_ref_counted_t {}
unsafe impl StartsWith<cef_base_scoped_t> for cef_base_scoped_t {}

unsafe impl StartsWith<cef_base_ref_counted_t> for cef_task_t {}
unsafe impl StartsWith<cef_base_ref_counted_t> for cef_v8context_t {}
unsafe impl StartsWith<cef_base_ref_counted_t> for cef_request_context_t {}
