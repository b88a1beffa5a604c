use std::any::{type_name, Any};
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLockUpgradableReadGuard;

use cef_capi::cef_base_ref_counted_t;

use crate::bridge::{Bridge, BridgeShared};
use crate::error::BridgeError;
use crate::ref_count::RefCountedReference;
use crate::registry::{EngineEntry, Entry};
use crate::starts_with::StartsWith;
use crate::wrapper_struct::RefCountedWrapperStruct;

/// Tokens identifying cores across moves, handed out monotonically.
static NEXT_CORE_ID: AtomicUsize = AtomicUsize::new(1);

/// The lifetime half every reference counted wrapper embeds.
///
/// Holds the pointer to the native struct in an atomic slot so dispose can
/// claim it exactly once, no matter how many paths race to run it. A core
/// built by [`wrap`] owns one native reference, returned to the engine when
/// the core is disposed; a core built by [`new_ref_counted`] owns the
/// backing memory itself.
pub struct RefCountedCore {
    shared: Arc<BridgeShared>,
    slot: AtomicUsize,
    id: usize,
    type_name: &'static str,
    engine_key: Option<usize>,
}

impl RefCountedCore {
    pub(crate) fn adopt<W, T>(
        bridge: &Bridge,
        instance: NonNull<T>,
        engine_key: Option<usize>,
    ) -> Self
    where
        W: Any,
        T: StartsWith<cef_base_ref_counted_t>,
    {
        Self {
            shared: Arc::clone(bridge.shared()),
            slot: AtomicUsize::new(instance.as_ptr() as usize),
            id: NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed),
            type_name: type_name::<W>(),
            engine_key,
        }
    }

    /// The native struct, without touching its reference count. The pointer
    /// is only valid while the caller also holds the wrapper alive.
    pub fn native_instance<T>(&self) -> Result<NonNull<T>, BridgeError>
    where
        T: StartsWith<cef_base_ref_counted_t>,
    {
        match NonNull::new(self.slot.load(Ordering::Acquire) as *mut T) {
            Some(instance) => Ok(instance),
            None => Err(BridgeError::Disposed {
                type_name: self.type_name,
            }),
        }
    }

    /// The native struct with one reference added on the caller's behalf,
    /// ready to be passed to a native call that consumes its arguments.
    pub fn get_native_instance<T>(&self) -> Result<NonNull<T>, BridgeError>
    where
        T: StartsWith<cef_base_ref_counted_t>,
    {
        let instance = self.native_instance::<T>()?;
        unsafe { cef_base_ref_counted_t::add_ref(instance.as_ptr() as *mut cef_base_ref_counted_t) };
        Ok(instance)
    }

    /// Address of the native struct, or 0 once disposed.
    pub fn address(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.address() == 0
    }

    pub fn add_ref(&self) -> Result<(), BridgeError> {
        let base = self.native_instance::<cef_base_ref_counted_t>()?;
        unsafe { cef_base_ref_counted_t::add_ref(base.as_ptr()) };
        Ok(())
    }

    /// Returns whether the reference released was the last one.
    pub fn release(&self) -> Result<bool, BridgeError> {
        let base = self.native_instance::<cef_base_ref_counted_t>()?;
        Ok(unsafe { cef_base_ref_counted_t::release(base.as_ptr()) } != 0)
    }

    pub fn has_one_ref(&self) -> Result<bool, BridgeError> {
        let base = self.native_instance::<cef_base_ref_counted_t>()?;
        Ok(unsafe { cef_base_ref_counted_t::has_one_ref(base.as_ptr()) } != 0)
    }

    pub fn has_at_least_one_ref(&self) -> Result<bool, BridgeError> {
        let base = self.native_instance::<cef_base_ref_counted_t>()?;
        Ok(unsafe { cef_base_ref_counted_t::has_at_least_one_ref(base.as_ptr()) } != 0)
    }

    /// Count the bridge's ledger holds for this struct. Zero for engine
    /// allocated structs, whose count lives inside the engine.
    pub fn reference_count(&self) -> usize {
        self.shared
            .registry
            .find(self.address())
            .map(|reference| reference.count())
            .unwrap_or(0)
    }

    /// Severs the wrapper from its native struct. First call wins; later
    /// calls, including the one from `Drop`, do nothing.
    ///
    /// A bridge allocated struct is freed here, an engine allocated one has
    /// the reference taken at wrap time handed back. During shutdown both
    /// are leaked instead, since the engine may already be gone.
    pub fn dispose(&self) {
        let address = self.slot.swap(0, Ordering::AcqRel);
        if address == 0 {
            return;
        }
        let ours = self.shared.alloc.is_allocated(address);
        self.shared
            .registry
            .remove_for(address, self.engine_key, self.id);
        if self.shared.is_shutting_down() {
            log::trace!("leaking native struct {address:#x} during shutdown");
            return;
        }
        if ours {
            self.shared.alloc.free(address);
        } else {
            unsafe { cef_base_ref_counted_t::release(address as *mut cef_base_ref_counted_t) };
        }
    }
}

impl Drop for RefCountedCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Implemented by wrappers around counted structs so generic machinery,
/// identity groups in particular, can reach their lifetime state.
pub trait RefCountedWrapper: Send + Sync + 'static {
    fn core(&self) -> &RefCountedCore;
}

/// Allocates a native struct of type `T`, installs the bridge's lifetime
/// callbacks in its header, and builds the owning wrapper around it.
///
/// The struct starts zeroed apart from its header, with an external count
/// of zero; the wrapper stays alive through the returned `Arc` until some
/// native caller takes a reference.
pub fn new_ref_counted<T, W, F>(bridge: &Bridge, build: F) -> Result<Arc<W>, BridgeError>
where
    T: StartsWith<cef_base_ref_counted_t>,
    W: Any + Send + Sync,
    F: FnOnce(RefCountedCore, NonNull<T>) -> W,
{
    let shared = bridge.shared();
    let block = shared.alloc.allocate(size_of::<T>())?;
    let base = block as *mut cef_base_ref_counted_t;
    unsafe {
        (*base).size = size_of::<T>();
        (*base).add_ref = Some(c_callbacks::add_ref);
        (*base).release = Some(c_callbacks::release);
        (*base).has_one_ref = Some(c_callbacks::has_one_ref);
        (*base).has_at_least_one_ref = Some(c_callbacks::has_at_least_one_ref);
    }
    // allocate never returns null
    let instance = unsafe { NonNull::new_unchecked(block as *mut T) };

    let core = RefCountedCore::adopt::<W, T>(bridge, instance, None);
    let core_id = core.id;
    let wrapper = Arc::new(build(core, instance));
    let weak = Arc::downgrade(&wrapper);
    let target: Weak<dyn Any + Send + Sync> = weak;
    let reference = Arc::new(RefCountedReference::new(block as usize, target));
    shared.registry.register(block as usize, reference, core_id);
    Ok(wrapper)
}

/// Wraps a native struct the engine handed over, reusing the existing
/// wrapper when one is already registered for it.
///
/// Ownership of one reference transfers with the pointer, per the engine's
/// argument convention: on a registry hit that reference is redundant and
/// is released here, on a miss the new core keeps it until disposed. `None`
/// for a null pointer. `create` runs with the registry locked and must not
/// call back into the bridge.
pub fn wrap<T, W, F>(bridge: &Bridge, instance: *mut T, create: F) -> Result<Option<Arc<W>>, BridgeError>
where
    T: StartsWith<cef_base_ref_counted_t>,
    W: Any + Send + Sync,
    F: FnOnce(RefCountedCore, NonNull<T>) -> W,
{
    let Some(instance) = NonNull::new(instance) else {
        return Ok(None);
    };
    let address = instance.as_ptr() as usize;
    let base = instance.as_ptr() as *mut cef_base_ref_counted_t;
    let shared = bridge.shared();

    let ours = shared.alloc.is_allocated(address);
    let engine_key = if shared.config.engine_identity && !ours {
        unsafe { RefCountedWrapperStruct::engine_key(base) }
    } else {
        None
    };

    let maps = shared.registry.maps.upgradable_read();

    // An engine object can come back under a fresh struct address; the
    // secondary table catches that before a duplicate wrapper is made.
    if let Some(key) = engine_key {
        if let Some(existing) = maps
            .by_engine_object
            .get(&key)
            .and_then(|entry| entry.target.upgrade())
        {
            drop(maps);
            unsafe { cef_base_ref_counted_t::release(base) };
            return downcast_existing(existing, address);
        }
    }

    if let Some(entry) = maps.by_address.get(&address) {
        if let Some(existing) = entry.reference.target() {
            let reference = Arc::clone(&entry.reference);
            drop(maps);
            if ours {
                reference.release()?;
            } else {
                unsafe { cef_base_ref_counted_t::release(base) };
            }
            return downcast_existing(existing, address);
        }
    }

    // A struct from our own allocator must stay registered for as long as
    // it is allocated; reaching here means a release went missing.
    debug_assert!(
        !ours,
        "bridge allocated struct {address:#x} has no registered wrapper"
    );

    let mut maps = RwLockUpgradableReadGuard::upgrade(maps);
    let core = RefCountedCore::adopt::<W, T>(bridge, instance, engine_key);
    let core_id = core.id;
    let wrapper = Arc::new(create(core, instance));
    let weak = Arc::downgrade(&wrapper);
    let target: Weak<dyn Any + Send + Sync> = weak;
    let reference = Arc::new(RefCountedReference::new(address, target.clone()));
    maps.by_address.insert(
        address,
        Entry {
            reference,
            core_id,
        },
    );
    if let Some(key) = engine_key {
        maps.by_engine_object.insert(key, EngineEntry { target, core_id });
    }
    drop(maps);
    Ok(Some(wrapper))
}

fn downcast_existing<W: Any + Send + Sync>(
    existing: Arc<dyn Any + Send + Sync>,
    address: usize,
) -> Result<Option<Arc<W>>, BridgeError> {
    match existing.downcast::<W>() {
        Ok(wrapper) => Ok(Some(wrapper)),
        Err(_) => Err(BridgeError::WrapperTypeMismatch {
            address,
            expected: type_name::<W>(),
        }),
    }
}

/// The live wrapper registered for `address` in this bridge, whatever its
/// concrete type.
pub fn get_instance(bridge: &Bridge, address: usize) -> Option<Arc<dyn Any + Send + Sync>> {
    bridge.shared().registry.get_instance(address)
}

/// The live wrapper registered for `address`, if it is a `W`. Never creates
/// a wrapper and never touches the native count.
pub fn get_cached<W: Any + Send + Sync>(bridge: &Bridge, address: usize) -> Option<Arc<W>> {
    bridge.shared().registry.cached::<W>(address)
}

/// Every live wrapper of type `W` this bridge currently holds, for
/// diagnostics and bulk teardown. Like [`get_cached`], never creates a
/// wrapper and never touches the native counts.
pub fn get_cached_wrappers<W: Any + Send + Sync>(bridge: &Bridge) -> Vec<Arc<W>> {
    bridge.shared().registry.cached_of::<W>()
}

/// Wrapper for a counted struct of unknown concrete type, seen only through
/// its lifetime header.
pub struct UnknownRefCounted {
    core: RefCountedCore,
}

impl UnknownRefCounted {
    pub fn wrap(
        bridge: &Bridge,
        instance: *mut cef_base_ref_counted_t,
    ) -> Result<Option<Arc<Self>>, BridgeError> {
        wrap(bridge, instance, |core, _| Self { core })
    }

    pub fn core(&self) -> &RefCountedCore {
        &self.core
    }
}

impl RefCountedWrapper for UnknownRefCounted {
    fn core(&self) -> &RefCountedCore {
        &self.core
    }
}

/// `extern "C"` entry points installed in the headers of bridge allocated
/// structs. They receive nothing but a struct address, so the owning bridge
/// is found through the live bridge roster.
pub(crate) mod c_callbacks {
    use core::ffi::c_int;

    use cef_capi::cef_base_ref_counted_t;

    use crate::bridge::{owned_by_live_bridge, resolve_ref_counted};
    use crate::error::BridgeError;

    pub(crate) unsafe extern "C" fn add_ref(this: *mut cef_base_ref_counted_t) {
        let address = this as usize;
        match resolve_ref_counted(address) {
            Some((_, reference)) => {
                if let Err(err) = reference.add_ref() {
                    broken_ledger("add_ref", err);
                }
            }
            None => unresolved("add_ref", address),
        }
    }

    pub(crate) unsafe extern "C" fn release(this: *mut cef_base_ref_counted_t) -> c_int {
        let address = this as usize;
        match resolve_ref_counted(address) {
            Some((_, reference)) => match reference.release() {
                Ok(remaining) => (remaining == 0) as c_int,
                Err(err) => {
                    broken_ledger("release", err);
                    0
                }
            },
            None => {
                unresolved("release", address);
                0
            }
        }
    }

    pub(crate) unsafe extern "C" fn has_one_ref(this: *mut cef_base_ref_counted_t) -> c_int {
        counted(this, |count| count == 1)
    }

    pub(crate) unsafe extern "C" fn has_at_least_one_ref(
        this: *mut cef_base_ref_counted_t,
    ) -> c_int {
        counted(this, |count| count >= 1)
    }

    fn counted(this: *mut cef_base_ref_counted_t, probe: impl FnOnce(usize) -> bool) -> c_int {
        let address = this as usize;
        match resolve_ref_counted(address) {
            Some((_, reference)) => probe(reference.count()) as c_int,
            None => {
                unresolved("count probe", address);
                0
            }
        }
    }

    fn broken_ledger(op: &str, err: BridgeError) {
        log::error!("{op} callback failed: {err}");
        debug_assert!(false, "{op} callback failed: {err}");
    }

    /// A callback arrived for an address no bridge knows. After the owning
    /// bridge is torn down this is expected engine teardown noise; while
    /// the struct is still allocated by a live bridge it means the registry
    /// entry was lost.
    fn unresolved(op: &str, address: usize) {
        if owned_by_live_bridge(address) {
            log::error!("{op} callback for unregistered bridge struct {address:#x}");
            debug_assert!(false, "unexpected access to unregistered struct {address:#x}");
        } else {
            log::debug!("{op} callback for {address:#x} after its bridge was dropped");
        }
    }
}
