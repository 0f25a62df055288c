//! HTTP surface of the OTP relay.

pub mod handlers;
pub mod server;

pub use handlers::ApiResponse;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
