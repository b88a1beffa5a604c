//! Stand-ins for the engine side of the boundary, used by the unit tests.
//!
//! [`FakeEngineObject`] mimics the shim the engine allocates around its own
//! objects: type tag, object pointer, then the counted struct whose address
//! callers see. Its callbacks keep a real count, so tests can assert on how
//! many references the bridge took and gave back.

use core::ffi::{c_int, c_void};
use std::cell::UnsafeCell;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cef_capi::{
    cef_base_ref_counted_t, cef_base_scoped_t, cef_request_context_t, cef_v8context_t,
};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[repr(C)]
pub(crate) struct FakeEngineObject<T> {
    // present for layout parity with the engine's shim, never read back
    #[allow(dead_code)]
    wrapper_type: usize,
    engine_object: *mut c_void,
    native: UnsafeCell<T>,
    refs: AtomicUsize,
}

unsafe impl<T> Send for FakeEngineObject<T> {}
unsafe impl<T> Sync for FakeEngineObject<T> {}

impl<T> FakeEngineObject<T> {
    fn build(engine_object: usize, native: T) -> Box<Self> {
        Box::new(Self {
            wrapper_type: 1,
            engine_object: engine_object as *mut c_void,
            native: UnsafeCell::new(native),
            refs: AtomicUsize::new(0),
        })
    }

    pub(crate) fn native_ptr(&self) -> *mut T {
        self.native.get()
    }

    pub(crate) fn base_ptr(&self) -> *mut cef_base_ref_counted_t {
        self.native.get() as *mut cef_base_ref_counted_t
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Hands out the struct with one reference, the way the engine passes
    /// arguments.
    pub(crate) fn grab(&self) -> *mut T {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.native_ptr()
    }
}

fn counted_header<T>() -> cef_base_ref_counted_t {
    cef_base_ref_counted_t {
        size: size_of::<T>(),
        add_ref: Some(fake_add_ref::<T>),
        release: Some(fake_release::<T>),
        has_one_ref: Some(fake_has_one_ref::<T>),
        has_at_least_one_ref: Some(fake_has_at_least_one_ref::<T>),
    }
}

impl FakeEngineObject<cef_base_ref_counted_t> {
    pub(crate) fn counted(engine_object: usize) -> Box<Self> {
        Self::build(engine_object, counted_header::<cef_base_ref_counted_t>())
    }
}

impl FakeEngineObject<cef_v8context_t> {
    pub(crate) fn v8_context(engine_object: usize) -> Box<Self> {
        Self::build(
            engine_object,
            cef_v8context_t {
                base: counted_header::<cef_v8context_t>(),
                get_task_runner: None,
                is_valid: Some(fake_v8_is_valid),
                get_browser: None,
                get_frame: None,
                get_global: None,
                enter: None,
                exit: None,
                is_same: Some(fake_v8_is_same),
            },
        )
    }
}

impl FakeEngineObject<cef_request_context_t> {
    pub(crate) fn request_context(engine_object: usize) -> Box<Self> {
        Self::build(
            engine_object,
            cef_request_context_t {
                base: counted_header::<cef_request_context_t>(),
                is_same: Some(fake_rc_is_same),
                is_sharing_with: None,
                is_global: None,
            },
        )
    }
}

unsafe fn container<T>(this: *mut cef_base_ref_counted_t) -> *mut FakeEngineObject<T> {
    unsafe { this.byte_sub(offset_of!(FakeEngineObject<T>, native)) as *mut FakeEngineObject<T> }
}

unsafe extern "C" fn fake_add_ref<T>(this: *mut cef_base_ref_counted_t) {
    unsafe { (*container::<T>(this)).refs.fetch_add(1, Ordering::SeqCst) };
}

unsafe extern "C" fn fake_release<T>(this: *mut cef_base_ref_counted_t) -> c_int {
    let previous = unsafe { (*container::<T>(this)).refs.fetch_sub(1, Ordering::SeqCst) };
    assert!(previous > 0, "fake engine object over-released");
    (previous == 1) as c_int
}

unsafe extern "C" fn fake_has_one_ref<T>(this: *mut cef_base_ref_counted_t) -> c_int {
    (unsafe { (*container::<T>(this)).refs() } == 1) as c_int
}

unsafe extern "C" fn fake_has_at_least_one_ref<T>(this: *mut cef_base_ref_counted_t) -> c_int {
    (unsafe { (*container::<T>(this)).refs() } >= 1) as c_int
}

unsafe extern "C" fn fake_v8_is_valid(_self: *mut cef_v8context_t) -> c_int {
    1
}

unsafe extern "C" fn fake_v8_is_same(
    self_: *mut cef_v8context_t,
    that: *mut cef_v8context_t,
) -> c_int {
    let ours = unsafe { (*container::<cef_v8context_t>(self_ as *mut cef_base_ref_counted_t)).engine_object };
    let theirs = unsafe { (*container::<cef_v8context_t>(that as *mut cef_base_ref_counted_t)).engine_object };
    // argument references are owned by the callee
    unsafe { fake_release::<cef_v8context_t>(that as *mut cef_base_ref_counted_t) };
    (ours == theirs) as c_int
}

unsafe extern "C" fn fake_rc_is_same(
    self_: *mut cef_request_context_t,
    that: *mut cef_request_context_t,
) -> c_int {
    let ours = unsafe {
        (*container::<cef_request_context_t>(self_ as *mut cef_base_ref_counted_t)).engine_object
    };
    let theirs = unsafe {
        (*container::<cef_request_context_t>(that as *mut cef_base_ref_counted_t)).engine_object
    };
    unsafe { fake_release::<cef_request_context_t>(that as *mut cef_base_ref_counted_t) };
    (ours == theirs) as c_int
}

/// A scoped struct the engine owns, recording whether its `del` ran.
#[repr(C)]
pub(crate) struct FakeScopedObject {
    native: UnsafeCell<cef_base_scoped_t>,
    deleted: AtomicBool,
}

unsafe impl Send for FakeScopedObject {}
unsafe impl Sync for FakeScopedObject {}

impl FakeScopedObject {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            native: UnsafeCell::new(cef_base_scoped_t {
                size: size_of::<cef_base_scoped_t>(),
                del: Some(fake_del),
            }),
            deleted: AtomicBool::new(false),
        })
    }

    pub(crate) fn native_ptr(&self) -> *mut cef_base_scoped_t {
        self.native.get()
    }

    pub(crate) fn deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }
}

unsafe extern "C" fn fake_del(this: *mut cef_base_scoped_t) {
    let object = this as *mut FakeScopedObject;
    let already = unsafe { (*object).deleted.swap(true, Ordering::SeqCst) };
    assert!(!already, "fake scoped object deleted twice");
}
