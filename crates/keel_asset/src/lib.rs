//! Keel Engine Assets
//!
//! Immutable "hailstorm" resource clusters: chunked, aligned, path-indexed
//! containers produced synchronously or through a stream sink, plus loading
//! over the engine's async I/O port.

pub mod hailstorm;
pub mod loader;

pub use hailstorm::{ClusterView, HailstormError};
pub use loader::load_cluster;
