use std::any::Any;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cef_capi::cef_base_ref_counted_t;

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::ref_counted::{wrap, RefCountedCore, RefCountedWrapper};
use crate::starts_with::StartsWith;

/// Wrappers for native types whose instances can reappear under different
/// struct addresses even with the engine object key unavailable. Members
/// are compared with the type's own same-instance probe before a new
/// wrapper is admitted, so two equal instances never get two wrappers.
///
/// Intended for statics, one group per wrapped type.
pub struct IdentityGroup<W> {
    members: Mutex<Vec<Weak<W>>>,
}

impl<W> IdentityGroup<W>
where
    W: RefCountedWrapper + Any + Send + Sync,
{
    pub const fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
        }
    }

    /// Like [`wrap`], but scans the group with `is_same` before creating.
    ///
    /// `is_same` receives the incoming struct and a group member's struct,
    /// must consume one reference to the member (the usual argument
    /// convention), and must not call back into this group. One incoming
    /// reference is consumed whichever way the call resolves.
    pub fn wrap_same<T, F, S>(
        &self,
        bridge: &Bridge,
        instance: *mut T,
        create: F,
        is_same: S,
    ) -> Result<Option<Arc<W>>, BridgeError>
    where
        T: StartsWith<cef_base_ref_counted_t>,
        F: FnOnce(RefCountedCore, NonNull<T>) -> W,
        S: Fn(NonNull<T>, NonNull<T>) -> bool,
    {
        let Some(incoming) = NonNull::new(instance) else {
            return Ok(None);
        };

        let mut members = self.members.lock();
        members.retain(|weak| weak.strong_count() > 0);

        for weak in members.iter() {
            let Some(member) = weak.upgrade() else {
                continue;
            };
            let Ok(existing) = member.core().native_instance::<T>() else {
                continue;
            };
            if existing == incoming {
                unsafe {
                    cef_base_ref_counted_t::release(
                        incoming.as_ptr() as *mut cef_base_ref_counted_t
                    );
                }
                return Ok(Some(member));
            }
            // a member disposed mid scan is simply not a match
            let Ok(candidate) = member.core().get_native_instance::<T>() else {
                continue;
            };
            if is_same(incoming, candidate) {
                unsafe {
                    cef_base_ref_counted_t::release(
                        incoming.as_ptr() as *mut cef_base_ref_counted_t
                    );
                }
                return Ok(Some(member));
            }
        }

        // Holding the member list across creation keeps a racing wrap of
        // the same instance from admitting a second wrapper.
        let wrapper = wrap(bridge, incoming.as_ptr(), create)?;
        if let Some(wrapper) = &wrapper {
            members.push(Arc::downgrade(wrapper));
        }
        Ok(wrapper)
    }

    /// Drops `wrapper` from the group. Idempotent.
    pub fn remove(&self, wrapper: &W) {
        self.members
            .lock()
            .retain(|weak| !std::ptr::eq(weak.as_ptr(), wrapper));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut members = self.members.lock();
        members.retain(|weak| weak.strong_count() > 0);
        members.len()
    }
}
