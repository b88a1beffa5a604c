use std::ptr::NonNull;
use std::sync::Arc;

use cef_capi::{cef_base_ref_counted_t, cef_v8context_t};

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::identity::IdentityGroup;
use crate::ref_counted::{RefCountedCore, RefCountedWrapper};

static CONTEXTS: IdentityGroup<V8Context> = IdentityGroup::new();

/// A V8 javascript context.
///
/// The engine mints a fresh struct for the same underlying context on
/// nearly every call, so plain address identity is useless here; wrapping
/// goes through a group keyed by the native `is_same` probe instead, and
/// equality of two wrappers asks the engine as well.
pub struct V8Context {
    core: RefCountedCore,
}

impl std::fmt::Debug for V8Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V8Context").finish_non_exhaustive()
    }
}

impl RefCountedWrapper for V8Context {
    fn core(&self) -> &RefCountedCore {
        &self.core
    }
}

impl V8Context {
    /// Wraps an engine context, consuming one reference to it. Returns the
    /// existing wrapper when the context is already wrapped, even under a
    /// different struct address. `None` for a null pointer.
    pub fn wrap(
        bridge: &Bridge,
        instance: *mut cef_v8context_t,
    ) -> Result<Option<Arc<Self>>, BridgeError> {
        CONTEXTS.wrap_same(
            bridge,
            instance,
            |core, _| Self { core },
            |incoming, candidate| unsafe { native_is_same(incoming, candidate) },
        )
    }

    pub fn is_valid(&self) -> Result<bool, BridgeError> {
        let instance = self.core.native_instance::<cef_v8context_t>()?;
        let is_valid = unsafe { (*instance.as_ptr()).is_valid };
        Ok(match is_valid {
            Some(is_valid) => unsafe { is_valid(instance.as_ptr()) != 0 },
            None => false,
        })
    }

    /// Enters the context's scope. Returns whether the engine accepted.
    pub fn enter(&self) -> Result<bool, BridgeError> {
        let instance = self.core.native_instance::<cef_v8context_t>()?;
        let enter = unsafe { (*instance.as_ptr()).enter };
        Ok(match enter {
            Some(enter) => unsafe { enter(instance.as_ptr()) != 0 },
            None => false,
        })
    }

    pub fn exit(&self) -> Result<bool, BridgeError> {
        let instance = self.core.native_instance::<cef_v8context_t>()?;
        let exit = unsafe { (*instance.as_ptr()).exit };
        Ok(match exit {
            Some(exit) => unsafe { exit(instance.as_ptr()) != 0 },
            None => false,
        })
    }

    /// Severs the wrapper early, leaving the group as well. A wrapper
    /// dropped without this is pruned from the group on the next wrap.
    pub fn dispose(&self) {
        CONTEXTS.remove(self);
        self.core.dispose();
    }
}

/// Asks the engine whether two context structs denote the same context.
/// Consumes one reference to `candidate` either way.
///
/// # Safety
/// Both pointers must be live context structs, and the caller must own the
/// `candidate` reference being handed over.
unsafe fn native_is_same(
    incoming: NonNull<cef_v8context_t>,
    candidate: NonNull<cef_v8context_t>,
) -> bool {
    match unsafe { (*incoming.as_ptr()).is_same } {
        Some(is_same) => unsafe { is_same(incoming.as_ptr(), candidate.as_ptr()) != 0 },
        None => {
            unsafe {
                cef_base_ref_counted_t::release(candidate.as_ptr() as *mut cef_base_ref_counted_t)
            };
            false
        }
    }
}

impl PartialEq for V8Context {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (Ok(ours), Ok(theirs)) = (
            self.core.native_instance::<cef_v8context_t>(),
            other.core.native_instance::<cef_v8context_t>(),
        ) else {
            return false;
        };
        if ours == theirs {
            return true;
        }
        let Ok(candidate) = other.core.get_native_instance::<cef_v8context_t>() else {
            return false;
        };
        unsafe { native_is_same(ours, candidate) }
    }
}

impl Eq for V8Context {}
