//! HTTP event surface: bus consumers and timer triggers

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;

pub use error::ApiError;
pub use server::{router, serve, shutdown_signal};
pub use state::AppState;
