//! HTTP surface: ingest + dashboard routes, api-key middleware, and router
//! assembly.

pub mod auth;
pub mod middleware;
pub mod routes;
mod server;
pub mod types;

pub use auth::AuthState;
pub use routes::AppState;
pub use server::ApiServer;
pub use types::ApiError;
