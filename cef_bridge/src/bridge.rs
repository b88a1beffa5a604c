use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::ref_count::RefCountedReference;
use crate::registry::RefCountedRegistry;
use crate::scoped::{ScopeTable, ScopedWrapper};
use crate::structure::StructureAllocator;

/// Every live bridge, so C callbacks that only receive a struct address can
/// find the bridge that owns it. Entries go stale when a bridge is dropped
/// and are pruned on the next resolution.
static BRIDGES: Mutex<Vec<Weak<BridgeShared>>> = Mutex::new(Vec::new());

static GLOBAL: OnceLock<Bridge> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Read the engine object pointer out of engine allocated shims and use
    /// it as a secondary identity key. Turn this off when linking against an
    /// engine build whose shim layout is unknown.
    pub engine_identity: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_identity: true,
        }
    }
}

/// Owner of all per-bridge state: the allocator for structs the bridge
/// creates, the wrapper registry, and the scoped object table.
pub(crate) struct BridgeShared {
    pub(crate) config: BridgeConfig,
    pub(crate) alloc: StructureAllocator,
    pub(crate) registry: RefCountedRegistry,
    pub(crate) scope: ScopeTable,
    shutdown: AtomicBool,
}

impl BridgeShared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Handle to the lifetime bridge. Cheap to clone; all clones share state.
///
/// Most programs use [`Bridge::global`], but tests and multi-engine setups
/// can run several isolated bridges side by side.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let shared = Arc::new(BridgeShared {
            config,
            alloc: StructureAllocator::new(),
            registry: RefCountedRegistry::new(),
            scope: ScopeTable::new(),
            shutdown: AtomicBool::new(false),
        });
        let mut bridges = BRIDGES.lock();
        bridges.retain(|entry| entry.strong_count() > 0);
        bridges.push(Arc::downgrade(&shared));
        Self { shared }
    }

    /// The process wide bridge, created on first use.
    pub fn global() -> &'static Bridge {
        GLOBAL.get_or_init(Bridge::new)
    }

    /// Marks the engine as going away. From here on, disposing wrappers no
    /// longer frees their native structs or calls back into the engine; the
    /// memory is leaked rather than handed to a library that may already be
    /// unloaded.
    pub fn begin_shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            log::debug!(
                "bridge shutting down, {} native structs will be leaked",
                self.shared.alloc.outstanding()
            );
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    pub(crate) fn shared(&self) -> &Arc<BridgeShared> {
        &self.shared
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the bridge whose registry holds `address`, along with the ledger
/// registered there.
pub(crate) fn resolve_ref_counted(
    address: usize,
) -> Option<(Arc<BridgeShared>, Arc<RefCountedReference>)> {
    each_live_bridge(|shared| {
        let reference = shared.registry.find(address)?;
        Some((Arc::clone(shared), reference))
    })
}

/// Finds the live wrapper registered for `address` in any bridge.
pub(crate) fn find_instance(address: usize) -> Option<Arc<dyn Any + Send + Sync>> {
    each_live_bridge(|shared| shared.registry.get_instance(address))
}

/// Finds the bridge whose scope table holds `address`, along with the
/// scoped wrapper registered there.
pub(crate) fn resolve_scoped(
    address: usize,
) -> Option<(Arc<BridgeShared>, Arc<dyn ScopedWrapper>)> {
    each_live_bridge(|shared| {
        let wrapper = shared.scope.get(address)?;
        Some((Arc::clone(shared), wrapper))
    })
}

/// Whether any live bridge allocated the struct at `address`. Used to tell
/// a genuinely dangling callback from one arriving after its bridge was
/// torn down.
pub(crate) fn owned_by_live_bridge(address: usize) -> bool {
    each_live_bridge(|shared| shared.alloc.is_allocated(address).then_some(())).is_some()
}

fn each_live_bridge<R>(mut probe: impl FnMut(&Arc<BridgeShared>) -> Option<R>) -> Option<R> {
    let mut bridges = BRIDGES.lock();
    let mut found = None;
    bridges.retain(|entry| match entry.upgrade() {
        Some(shared) => {
            if found.is_none() {
                found = probe(&shared);
            }
            true
        }
        None => false,
    });
    found
}
