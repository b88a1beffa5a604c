use thiserror::Error;

/// Errors surfaced by the lifetime bridge.
///
/// `Disposed` is the one recoverable condition: a caller raced the end of
/// a wrapper's life and can simply stop using it. The remaining variants
/// indicate either a caller protocol violation or a bridge defect.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Operation on a wrapper whose native pointer has already been
    /// cleared.
    #[error("{type_name} has been disposed")]
    Disposed { type_name: &'static str },

    /// The ledger was asked to root a wrapper that no longer exists. The
    /// wrapper for a native object must stay reachable while the native
    /// side can still hand its pointer back.
    #[error("no live wrapper corresponds to native object {address:#x}")]
    InvalidCefObject { address: usize },

    /// `release` without a matching `add_ref`.
    #[error("reference count underflow on native object {address:#x}")]
    RefCountUnderflow { address: usize },

    /// The registry already holds a wrapper of a different type for this
    /// address.
    #[error("native object {address:#x} is already wrapped as another type, expected {expected}")]
    WrapperTypeMismatch {
        address: usize,
        expected: &'static str,
    },

    /// The structure allocator could not reserve backing memory.
    #[error("failed to allocate {size} bytes for a native struct")]
    AllocationFailed { size: usize },
}
