//! HTTP front end for the gateway.
//!
//! Every route funnels into the one `Dispatcher`: REST tool routes, the
//! `/mcp` JSON-RPC route and the legacy `/docker_command` and
//! `/system_command` routes differ only in how they shape requests and
//! responses.

pub mod api;
pub mod auth;
pub mod legacy;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
