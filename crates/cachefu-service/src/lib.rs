//! Core caching, HTTP, and remote-loading services for cachefu.
//!
//! The three subsystems build on each other: [`caching`] provides the
//! two-level (memory + disk) object cache, [`http`] provides the
//! retry-aware HTTP client that uses a cache for response storage, and
//! [`loader`] dispatches cache-aware background fetches to recycled
//! targets.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod http;
pub mod loader;
pub mod logging;
