//! HTTP boundary: configuration, middleware, handlers, and server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use middleware::{extract_context, ACTOR_HEADER, TENANT_HEADER, TENANT_QUERY_PARAM};
pub use module::NetworkModule;
pub use shutdown::*;
