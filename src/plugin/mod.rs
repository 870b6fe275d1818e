//! Plugin host - discovery, lifecycle, and snapshot broadcast for
//! native extension modules
//!
//! `api` defines the C ABI shared with plugin modules, `bridge` builds
//! the call-scoped flat views handed across that boundary, and `host`
//! drives the per-module lifecycle.

pub mod api;
pub(crate) mod bridge;
pub mod host;
