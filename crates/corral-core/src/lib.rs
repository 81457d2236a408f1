//! Core data types for the Corral resolver.
//!
//! This crate defines the vocabulary shared by every other crate: conda
//! versions and their ordering, match specs, package records, channels,
//! global configuration and the environment state file.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod channel;
pub mod config;
pub mod environment;
pub mod record;
pub mod spec;
pub mod version;
