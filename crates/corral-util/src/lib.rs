//! Shared utilities for Corral.
//!
//! This crate provides cross-cutting concerns used by all other Corral crates:
//! the unified error type, filesystem helpers, hashing, and terminal status
//! and progress indicators.

pub mod errors;
pub mod fs;
pub mod hash;
pub mod progress;
