pub mod auth;
pub mod cache;
pub mod download;
pub mod loader;
pub mod repodata;
