use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::BridgeError;

/// Alignment given to every block, generous enough for any CEF struct.
const BLOCK_ALIGN: usize = 16;

/// Allocates and tracks the unmanaged blocks backing native structs the
/// bridge creates itself.
///
/// The tracking table is what tells "a struct we allocated" apart from "a
/// struct the engine allocated and only lent us a pointer to": the former
/// must be freed here exactly once, the latter must never be freed here at
/// all. Blocks still allocated when the allocator is dropped are leaked,
/// which is deliberate; see `Bridge::begin_shutdown`.
pub(crate) struct StructureAllocator {
    blocks: Mutex<HashMap<usize, Layout>>,
}

impl StructureAllocator {
    pub(crate) fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves a zero-initialized block of at least `size` bytes and
    /// records it as allocated.
    pub(crate) fn allocate(&self, size: usize) -> Result<*mut u8, BridgeError> {
        let layout = Layout::from_size_align(size.max(1), BLOCK_ALIGN)
            .map_err(|_| BridgeError::AllocationFailed { size })?;
        let block = unsafe { alloc_zeroed(layout) };
        if block.is_null() {
            return Err(BridgeError::AllocationFailed { size });
        }
        self.blocks.lock().insert(block as usize, layout);
        log::trace!("allocated {size} byte native struct at {:#x}", block as usize);
        Ok(block)
    }

    /// Frees the block at `address` if this allocator owns it. Returns
    /// false when the address is unknown (already freed, or never ours);
    /// callers must treat that as "this memory is not mine to free".
    pub(crate) fn free(&self, address: usize) -> bool {
        let Some(layout) = self.blocks.lock().remove(&address) else {
            return false;
        };
        unsafe { dealloc(address as *mut u8, layout) };
        log::trace!("freed native struct at {address:#x}");
        true
    }

    pub(crate) fn is_allocated(&self, address: usize) -> bool {
        self.blocks.lock().contains_key(&address)
    }

    /// Number of blocks not yet freed.
    pub(crate) fn outstanding(&self) -> usize {
        self.blocks.lock().len()
    }
}
