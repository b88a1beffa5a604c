use std::any::Any;
use std::collections::HashMap;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use cef_capi::cef_base_scoped_t;

use crate::bridge::{Bridge, BridgeShared};
use crate::error::BridgeError;
use crate::starts_with::StartsWith;

/// Implemented by wrappers around scoped (single owner, uncounted) structs
/// so the `del` callback can reach their lifetime state.
pub trait ScopedWrapper: Send + Sync + 'static {
    fn core(&self) -> &ScopedCore;
}

struct ScopeEntry {
    wrapper: Weak<dyn ScopedWrapper>,
    any: Weak<dyn Any + Send + Sync>,
}

/// Live scoped wrappers by native struct address. Unlike the counted
/// registry this holds only weak handles: a scoped struct has exactly one
/// owner, and that owner is the Rust `Arc`, not this table.
pub(crate) struct ScopeTable {
    entries: Mutex<HashMap<usize, ScopeEntry>>,
}

impl ScopeTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn insert<W: ScopedWrapper + Any>(&self, address: usize, wrapper: &Arc<W>) {
        let weak = Arc::downgrade(wrapper);
        let as_wrapper: Weak<dyn ScopedWrapper> = weak.clone();
        let as_any: Weak<dyn Any + Send + Sync> = weak;
        self.entries.lock().insert(
            address,
            ScopeEntry {
                wrapper: as_wrapper,
                any: as_any,
            },
        );
    }

    /// Removes the entry for `address`. Returning false means another path
    /// already disposed this struct; the caller must not touch it again.
    pub(crate) fn remove(&self, address: usize) -> bool {
        self.entries.lock().remove(&address).is_some()
    }

    pub(crate) fn get(&self, address: usize) -> Option<Arc<dyn ScopedWrapper>> {
        self.entries.lock().get(&address)?.wrapper.upgrade()
    }

    fn get_any(&self, address: usize) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.lock().get(&address)?.any.upgrade()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Lifetime half of a scoped wrapper. Same single shot dispose slot as
/// [`crate::RefCountedCore`], without any reference ledger.
pub struct ScopedCore {
    shared: Arc<BridgeShared>,
    slot: AtomicUsize,
    type_name: &'static str,
}

impl ScopedCore {
    fn adopt<W: Any, T: StartsWith<cef_base_scoped_t>>(
        bridge: &Bridge,
        instance: NonNull<T>,
    ) -> Self {
        Self {
            shared: Arc::clone(bridge.shared()),
            slot: AtomicUsize::new(instance.as_ptr() as usize),
            type_name: std::any::type_name::<W>(),
        }
    }

    pub fn native_instance<T>(&self) -> Result<NonNull<T>, BridgeError>
    where
        T: StartsWith<cef_base_scoped_t>,
    {
        match NonNull::new(self.slot.load(Ordering::Acquire) as *mut T) {
            Some(instance) => Ok(instance),
            None => Err(BridgeError::Disposed {
                type_name: self.type_name,
            }),
        }
    }

    pub fn address(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.address() == 0
    }

    /// Destroys the native struct. Reached both from the wrapper's `Drop`
    /// and from the engine calling the struct's `del` slot; whichever comes
    /// first wins and the other becomes a no-op.
    pub fn dispose(&self) {
        let address = self.slot.swap(0, Ordering::AcqRel);
        if address == 0 {
            return;
        }
        if !self.shared.scope.remove(address) {
            log::error!("scoped struct {address:#x} was already removed from its table");
            debug_assert!(false, "double dispose of scoped struct {address:#x}");
            return;
        }
        if self.shared.is_shutting_down() {
            log::trace!("leaking scoped struct {address:#x} during shutdown");
            return;
        }
        if !self.shared.alloc.free(address) {
            // engine allocated; ownership was transferred to us at wrap time
            unsafe { cef_base_scoped_t::del(address as *mut cef_base_scoped_t) };
        }
    }
}

impl Drop for ScopedCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Allocates a scoped struct of type `T` with the bridge's `del` callback
/// installed and builds its owning wrapper.
pub fn new_scoped<T, W, F>(bridge: &Bridge, build: F) -> Result<Arc<W>, BridgeError>
where
    T: StartsWith<cef_base_scoped_t>,
    W: ScopedWrapper + Any,
    F: FnOnce(ScopedCore, NonNull<T>) -> W,
{
    let shared = bridge.shared();
    let block = shared.alloc.allocate(size_of::<T>())?;
    let base = block as *mut cef_base_scoped_t;
    unsafe {
        (*base).size = size_of::<T>();
        (*base).del = Some(del_callback);
    }
    // allocate never returns null
    let instance = unsafe { NonNull::new_unchecked(block as *mut T) };

    let core = ScopedCore::adopt::<W, T>(bridge, instance);
    let wrapper = Arc::new(build(core, instance));
    shared.scope.insert(block as usize, &wrapper);
    Ok(wrapper)
}

/// Wraps a scoped struct the engine handed over, taking ownership of it.
/// The struct's `del` slot is invoked when the wrapper is disposed. `None`
/// for a null pointer.
pub fn wrap_scoped<T, W, F>(
    bridge: &Bridge,
    instance: *mut T,
    create: F,
) -> Result<Option<Arc<W>>, BridgeError>
where
    T: StartsWith<cef_base_scoped_t>,
    W: ScopedWrapper + Any,
    F: FnOnce(ScopedCore, NonNull<T>) -> W,
{
    let Some(instance) = NonNull::new(instance) else {
        return Ok(None);
    };
    let core = ScopedCore::adopt::<W, T>(bridge, instance);
    let wrapper = Arc::new(create(core, instance));
    bridge
        .shared()
        .scope
        .insert(instance.as_ptr() as usize, &wrapper);
    Ok(Some(wrapper))
}

/// The live scoped wrapper registered for `address`, if it is a `W`.
pub fn get_scoped_instance<W: ScopedWrapper + Any>(
    bridge: &Bridge,
    address: usize,
) -> Option<Arc<W>> {
    bridge
        .shared()
        .scope
        .get_any(address)?
        .downcast::<W>()
        .ok()
}

/// `del` entry point installed in bridge allocated scoped structs.
pub(crate) unsafe extern "C" fn del_callback(this: *mut cef_base_scoped_t) {
    let address = this as usize;
    match crate::bridge::resolve_scoped(address) {
        Some((_, wrapper)) => wrapper.core().dispose(),
        None => {
            if crate::bridge::owned_by_live_bridge(address) {
                log::error!("del callback for unregistered scoped struct {address:#x}");
                debug_assert!(false, "unexpected del of unregistered struct {address:#x}");
            } else {
                log::debug!("del callback for {address:#x} after its bridge was dropped");
            }
        }
    }
}
