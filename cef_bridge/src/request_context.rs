use std::ptr::NonNull;
use std::sync::Arc;

use cef_capi::{cef_base_ref_counted_t, cef_request_context_t};

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::identity::IdentityGroup;
use crate::ref_counted::{RefCountedCore, RefCountedWrapper};

static REQUEST_CONTEXTS: IdentityGroup<RequestContext> = IdentityGroup::new();

/// A browser request context. Same address instability as
/// [`crate::V8Context`], handled the same way.
pub struct RequestContext {
    core: RefCountedCore,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext").finish_non_exhaustive()
    }
}

impl RefCountedWrapper for RequestContext {
    fn core(&self) -> &RefCountedCore {
        &self.core
    }
}

impl RequestContext {
    /// Wraps an engine request context, consuming one reference to it.
    /// Returns the existing wrapper when the context is already wrapped.
    /// `None` for a null pointer.
    pub fn wrap(
        bridge: &Bridge,
        instance: *mut cef_request_context_t,
    ) -> Result<Option<Arc<Self>>, BridgeError> {
        REQUEST_CONTEXTS.wrap_same(
            bridge,
            instance,
            |core, _| Self { core },
            |incoming, candidate| unsafe { native_is_same(incoming, candidate) },
        )
    }

    pub fn is_global(&self) -> Result<bool, BridgeError> {
        let instance = self.core.native_instance::<cef_request_context_t>()?;
        let is_global = unsafe { (*instance.as_ptr()).is_global };
        Ok(match is_global {
            Some(is_global) => unsafe { is_global(instance.as_ptr()) != 0 },
            None => false,
        })
    }

    /// Whether this context shares storage with `other`. Consumes nothing;
    /// the reference handed to the engine is taken here.
    pub fn is_sharing_with(&self, other: &RequestContext) -> Result<bool, BridgeError> {
        let ours = self.core.native_instance::<cef_request_context_t>()?;
        let is_sharing_with = unsafe { (*ours.as_ptr()).is_sharing_with };
        let Some(is_sharing_with) = is_sharing_with else {
            return Ok(false);
        };
        let theirs = other.core.get_native_instance::<cef_request_context_t>()?;
        Ok(unsafe { is_sharing_with(ours.as_ptr(), theirs.as_ptr()) != 0 })
    }

    /// Severs the wrapper early, leaving the group as well. A wrapper
    /// dropped without this is pruned from the group on the next wrap.
    pub fn dispose(&self) {
        REQUEST_CONTEXTS.remove(self);
        self.core.dispose();
    }
}

/// Consumes one reference to `candidate` either way.
///
/// # Safety
/// Both pointers must be live request context structs, and the caller must
/// own the `candidate` reference being handed over.
unsafe fn native_is_same(
    incoming: NonNull<cef_request_context_t>,
    candidate: NonNull<cef_request_context_t>,
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

impl PartialEq for RequestContext {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (Ok(ours), Ok(theirs)) = (
            self.core.native_instance::<cef_request_context_t>(),
            other.core.native_instance::<cef_request_context_t>(),
        ) else {
            return false;
        };
        if ours == theirs {
            return true;
        }
        let Ok(candidate) = other.core.get_native_instance::<cef_request_context_t>() else {
            return false;
        };
        unsafe { native_is_same(ours, candidate) }
    }
}

impl Eq for RequestContext {}
