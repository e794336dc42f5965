//! Storage infrastructure: configuration file persistence.
//!
//! The engine keeps no state across runs.  The only file it reads is the
//! optional `config.toml` handled by the `config` sub-module.

pub mod config;
