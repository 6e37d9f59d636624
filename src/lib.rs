// Library exports for the binary and tests
pub mod commands;
pub mod config;
pub mod store;
pub mod whitelist;
