//! Keel Engine Core
//!
//! Contains the infrastructure the rest of the engine stands on:
//! - Memory primitives and allocators
//! - Binary configuration store (builder + frozen blob reader)
//! - Entity component storage (archetype/chunk engine)
//! - Asynchronous file I/O port
//! - Job queues

pub mod aio;
pub mod config;
pub mod ecs;
pub mod jobs;
pub mod memory;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
