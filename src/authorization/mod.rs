//! Everything related to authorization.
//!
//! Authentication answers "who is this"; this module answers "what are they
//! allowed to do". Both the HTTP gate and the stream RPC gate compare the
//! [`Role`] baked into a session payload against a set of allowed roles. For
//! HTTP routes the allowed set is attached directly to the gate; for RPCs it
//! is looked up in the [`RouteRoles`] registry keyed by the full method name.

mod roles;

#[doc(inline)]
pub use roles::{InvalidRole, Role};

mod registry;

#[doc(inline)]
pub use registry::RouteRoles;
