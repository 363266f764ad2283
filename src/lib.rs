// Library crate for integration tests and the binary.

pub mod config;
pub mod error;
pub mod events;
pub mod load_generator;
pub mod log_capture;
pub mod pipeline;
pub mod provider;
pub mod routes;
pub mod scoring;
pub mod server;
pub mod settings;
pub mod stages;
pub mod state;
pub mod target;
