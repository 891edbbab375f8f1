pub mod auth;
pub mod config;
pub mod error;

pub use auth::AuthGate;
pub use config::Config;
pub use error::*;
