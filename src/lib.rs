pub mod client_identity;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod token_bucket;
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
pub use rate_limiter::RateLimiter;
pub use server::{create_app, Server, ServerState, ShutdownReason};
