pub mod auth;
pub mod config;
pub mod database;
pub mod document;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use routes::build_router;
pub use state::{AppState, Backends};
