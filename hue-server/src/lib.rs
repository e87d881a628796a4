pub mod config;
pub mod credentials;
pub mod routes;
pub mod sessions;

pub use routes::{router, AppState};
