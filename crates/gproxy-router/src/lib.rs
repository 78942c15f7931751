//! HTTP surface: the per-provider proxy routes and the operator-facing admin API.

pub mod admin;
pub mod proxy;

pub use admin::{AdminState, admin_router};
pub use proxy::{ProxyState, proxy_router};
