//! Single-flight credential refresh.
//!
//! A burst of requests failing with 401 shares one call to the refresh
//! endpoint. The first failing request starts the refresh; every later one
//! queues behind it and is settled, in enqueue order, with the same outcome.

mod coordinator;
mod observer;
mod refresher;

pub use coordinator::Coordinator;
pub use observer::SessionObserver;
pub use refresher::{HttpTokenRefresher, TokenRefresher};
