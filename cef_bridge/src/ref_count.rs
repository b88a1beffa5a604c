use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::BridgeError;

/// Externally visible reference count for one native struct the bridge
/// allocated, plus the strong root that keeps the owning wrapper alive
/// while any native reference is outstanding.
///
/// Count and root move together under one lock: no thread can observe a
/// positive count with an empty root, or a zero count with a populated
/// one. The root is what substitutes for the native side "holding" the
/// wrapper; once the count returns to zero the wrapper lives or dies with
/// its remaining `Arc`s alone.
pub struct RefCountedReference {
    address: usize,
    target: Weak<dyn Any + Send + Sync>,
    state: Mutex<State>,
}

struct State {
    count: usize,
    root: Option<Arc<dyn Any + Send + Sync>>,
}

impl RefCountedReference {
    pub(crate) fn new(address: usize, target: Weak<dyn Any + Send + Sync>) -> Self {
        Self {
            address,
            target,
            state: Mutex::new(State {
                count: 0,
                root: None,
            }),
        }
    }

    /// Increments the count. The 0 to 1 transition pins the wrapper with a
    /// strong root; if the wrapper is already gone at that point the
    /// bridge's liveness invariant has been broken and the error says so.
    pub fn add_ref(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if state.count == 0 {
            let root = self
                .target
                .upgrade()
                .ok_or(BridgeError::InvalidCefObject {
                    address: self.address,
                })?;
            state.root = Some(root);
        }
        state.count += 1;
        Ok(())
    }

    /// Decrements the count and returns the remainder. The transition to
    /// zero drops the root, making the wrapper collectible.
    pub fn release(&self) -> Result<usize, BridgeError> {
        let unrooted;
        let remaining;
        {
            let mut state = self.state.lock();
            if state.count == 0 {
                return Err(BridgeError::RefCountUnderflow {
                    address: self.address,
                });
            }
            state.count -= 1;
            remaining = state.count;
            // The root must not be dropped while the state lock is held:
            // tearing down the wrapper can re-enter the bridge.
            unrooted = if remaining == 0 { state.root.take() } else { None };
        }
        drop(unrooted);
        Ok(remaining)
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_rooted(&self) -> bool {
        self.state.lock().root.is_some()
    }

    /// The wrapper this ledger belongs to, if it is still alive.
    pub(crate) fn target(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.target.upgrade()
    }
}
