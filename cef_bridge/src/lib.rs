//! Lifetime and identity bridge between Rust wrappers and CEF's reference
//! counted C structs.
//!
//! CEF objects cross the C boundary as structs whose first field is a
//! lifetime header, either counted ([`cef_capi::cef_base_ref_counted_t`])
//! or single owner ([`cef_capi::cef_base_scoped_t`]). This crate keeps
//! exactly one Rust wrapper alive per native object, mirrors the external
//! reference count into a ledger that pins the wrapper while the engine
//! holds references, and tears both sides down exactly once no matter
//! which side lets go last.
//!
//! The entry points are [`Bridge`] plus the wrapping functions: [`wrap`]
//! and [`new_ref_counted`] for counted structs, [`wrap_scoped`] and
//! [`new_scoped`] for scoped ones, and the concrete wrappers
//! [`V8Context`], [`RequestContext`] and [`ActionTask`].

mod bridge;
mod error;
mod identity;
mod ref_count;
mod ref_counted;
mod registry;
mod request_context;
mod scoped;
mod starts_with;
mod structure;
mod task;
mod v8_context;
mod wrapper_struct;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeConfig};
pub use error::BridgeError;
pub use identity::IdentityGroup;
pub use ref_count::RefCountedReference;
pub use ref_counted::{
    get_cached, get_cached_wrappers, get_instance, new_ref_counted, wrap, RefCountedCore,
    RefCountedWrapper, UnknownRefCounted,
};
pub use request_context::RequestContext;
pub use scoped::{get_scoped_instance, new_scoped, wrap_scoped, ScopedCore, ScopedWrapper};
pub use starts_with::StartsWith;
pub use task::{post, post_delayed, ActionTask};
pub use v8_context::V8Context;
