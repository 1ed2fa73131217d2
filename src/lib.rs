pub mod access;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod governor;
pub mod invoker;
pub mod logging;
pub mod metrics;
pub mod mode;
pub mod pipeline;
pub mod ports;
pub mod providers;
pub mod store;
pub mod testing;
pub mod types;
