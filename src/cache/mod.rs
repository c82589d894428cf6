//! Versioned response cache for offline support.
//!
//! This module provides:
//! - A version-tagged cache generation populated from a static asset manifest
//! - Activation that purges every generation except the current one
//! - Network-first GET serving online, cache-first offline

mod manager;
mod storage;
mod types;

pub use manager::CacheManager;
pub use storage::{CacheStorage, SqliteCacheStorage};
pub use types::{ResponseSource, Served};
