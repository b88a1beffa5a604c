use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::ref_count::RefCountedReference;

/// One registered wrapper, keyed in [`Maps::by_address`] by its native
/// struct address.
pub(crate) struct Entry {
    pub(crate) reference: Arc<RefCountedReference>,
    /// Token of the core that registered this entry. A disposing core may
    /// only evict its own entry; a replacement wrapper that has since taken
    /// the slot stays put.
    pub(crate) core_id: usize,
}

/// Secondary identity key for structs the engine builds around one of its
/// own C++ objects. Two such structs with different addresses can still be
/// the same underlying object.
pub(crate) struct EngineEntry {
    pub(crate) target: Weak<dyn Any + Send + Sync>,
    pub(crate) core_id: usize,
}

#[derive(Default)]
pub(crate) struct Maps {
    pub(crate) by_address: HashMap<usize, Entry>,
    pub(crate) by_engine_object: HashMap<usize, EngineEntry>,
}

/// The one-wrapper-per-native-object table.
///
/// Lookups vastly outnumber insertions, so the table sits behind a reader
/// writer lock; `wrap` takes it upgradably so a lookup miss can become an
/// insertion without a window for a second wrapper to slip in.
pub(crate) struct RefCountedRegistry {
    pub(crate) maps: RwLock<Maps>,
}

impl RefCountedRegistry {
    pub(crate) fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Ledger for the wrapper registered at `address`, if any.
    pub(crate) fn find(&self, address: usize) -> Option<Arc<RefCountedReference>> {
        self.maps
            .read()
            .by_address
            .get(&address)
            .map(|entry| Arc::clone(&entry.reference))
    }

    /// Live wrapper registered at `address`, if any.
    pub(crate) fn get_instance(&self, address: usize) -> Option<Arc<dyn Any + Send + Sync>> {
        self.find(address)?.target()
    }

    /// Live wrapper registered at `address`, if it exists and is a `W`.
    pub(crate) fn cached<W: Any + Send + Sync>(&self, address: usize) -> Option<Arc<W>> {
        self.get_instance(address)?.downcast::<W>().ok()
    }

    /// Every live wrapper of type `W`, in no particular order. Entries
    /// whose wrapper has been collected are skipped, not pruned; their
    /// disposing cores remove them.
    pub(crate) fn cached_of<W: Any + Send + Sync>(&self) -> Vec<Arc<W>> {
        self.maps
            .read()
            .by_address
            .values()
            .filter_map(|entry| entry.reference.target()?.downcast::<W>().ok())
            .collect()
    }

    /// Registers a freshly created wrapper. The caller must already know no
    /// entry exists for `address`; structs the bridge allocates itself get
    /// unique addresses, so no upgradable dance is needed here.
    pub(crate) fn register(
        &self,
        address: usize,
        reference: Arc<RefCountedReference>,
        core_id: usize,
    ) {
        let mut maps = self.maps.write();
        maps.by_address.insert(
            address,
            Entry {
                reference,
                core_id,
            },
        );
    }

    /// Drops the entries a disposing core registered, but only if they are
    /// still that core's. Returns whether the primary entry was removed.
    pub(crate) fn remove_for(
        &self,
        address: usize,
        engine_key: Option<usize>,
        core_id: usize,
    ) -> bool {
        let mut maps = self.maps.write();
        let removed = match maps.by_address.get(&address) {
            Some(entry) if entry.core_id == core_id => {
                maps.by_address.remove(&address);
                true
            }
            _ => false,
        };
        if let Some(key) = engine_key {
            if let Some(entry) = maps.by_engine_object.get(&key) {
                if entry.core_id == core_id {
                    maps.by_engine_object.remove(&key);
                }
            }
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.maps.read().by_address.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_for(address: usize, wrapper: &Arc<String>) -> Arc<RefCountedReference> {
        let weak = Arc::downgrade(wrapper);
        let target: Weak<dyn Any + Send + Sync> = weak;
        Arc::new(RefCountedReference::new(address, target))
    }

    #[test]
    fn registered_wrappers_are_found_by_address() {
        let registry = RefCountedRegistry::new();
        let wrapper = Arc::new(String::from("wrapper"));
        registry.register(0x10, ledger_for(0x10, &wrapper), 0x999);

        assert!(registry.find(0x10).is_some());
        assert!(registry.find(0x20).is_none());
        let instance = registry.cached::<String>(0x10).unwrap();
        assert!(Arc::ptr_eq(&instance, &wrapper));
    }

    #[test]
    fn cached_refuses_the_wrong_type() {
        let registry = RefCountedRegistry::new();
        let wrapper = Arc::new(String::from("wrapper"));
        registry.register(0x10, ledger_for(0x10, &wrapper), 0x999);

        assert!(registry.cached::<Vec<u8>>(0x10).is_none());
    }

    #[test]
    fn collected_wrappers_resolve_to_nothing() {
        let registry = RefCountedRegistry::new();
        let wrapper = Arc::new(String::from("wrapper"));
        registry.register(0x10, ledger_for(0x10, &wrapper), 0x999);
        drop(wrapper);

        assert!(registry.find(0x10).is_some());
        assert!(registry.get_instance(0x10).is_none());
    }

    #[test]
    fn cached_of_yields_only_live_wrappers_of_the_type() {
        let registry = RefCountedRegistry::new();
        let first = Arc::new(String::from("first"));
        let second = Arc::new(String::from("second"));
        let other = Arc::new(42u64);
        registry.register(0x10, ledger_for(0x10, &first), 0x111);
        registry.register(0x20, ledger_for(0x20, &second), 0x222);
        registry.register(
            0x30,
            Arc::new(RefCountedReference::new(0x30, {
                let weak = Arc::downgrade(&other);
                let target: Weak<dyn Any + Send + Sync> = weak;
                target
            })),
            0x333,
        );

        drop(second);
        let strings = registry.cached_of::<String>();
        assert_eq!(strings.len(), 1);
        assert!(Arc::ptr_eq(&strings[0], &first));
        assert_eq!(registry.cached_of::<u64>().len(), 1);
    }

    #[test]
    fn removal_is_refused_for_a_superseded_core() {
        let registry = RefCountedRegistry::new();
        let first = Arc::new(String::from("first"));
        registry.register(0x10, ledger_for(0x10, &first), 0x111);

        let second = Arc::new(String::from("second"));
        registry.register(0x10, ledger_for(0x10, &second), 0x222);

        assert!(!registry.remove_for(0x10, None, 0x111));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_for(0x10, None, 0x222));
        assert_eq!(registry.len(), 0);
    }
}
