//! HTTP client building with the auth middleware.

mod client;
mod gateway;
mod middleware;

pub use client::{GatewayBuilder, HttpClientConfig, DEFAULT_REFRESH_PATH};
pub use gateway::Gateway;
pub use middleware::AuthMiddleware;
