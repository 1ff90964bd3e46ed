// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod api;
pub mod db;
pub mod error;
pub mod metrics;
pub mod query;
pub mod refresh;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod summary;

// These modules are only needed by the binary.
pub mod cli;
pub mod config;
pub mod logging;
