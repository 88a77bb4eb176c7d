// mod.rs - the hailstorm resource cluster format
//
// A cluster packs many (metadata, data, path) triples into chunked, aligned,
// offset-addressed storage. The layout, in file order:
//
//   header (64 B) | paths descriptor (16 B) | chunks[] | resources[]
//   | paths data (NUL-terminated, zero-padded to 8) | chunk payloads
//
// Every chunk payload starts at an 8-byte aligned offset. `header_size` is
// the offset of the paths-data block, the first data-carrying region.

mod paths;
mod read;
mod stream;
mod write;

pub use paths::{prefix_resource_paths, prefixed_paths_size};
pub use read::ClusterView;
pub use stream::{write_cluster_stream, StreamSink};
pub use write::{write_cluster, ChunkRef, ResourceData, WriteData, WriteParams};

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub const HAILSTORM_MAGIC: [u8; 4] = *b"HSC1";
pub const HAILSTORM_HEADER_VERSION: u16 = 1;

/// Upper bound accepted for `header_size` when validating a cluster.
pub const MAX_HEADER_SIZE: u64 = 1024 * 1024 * 1024;

pub const FLAG_ENCRYPTED: u32 = 1 << 0;
pub const FLAG_EXPANSION: u32 = 1 << 1;
pub const FLAG_PATCH: u32 = 1 << 2;
pub const FLAG_BAKED: u32 = 1 << 3;

/// Chunk carries metadata entries.
pub const CHUNK_KIND_META: u8 = 1;
/// Chunk carries resource data.
pub const CHUNK_KIND_DATA: u8 = 2;
/// Chunk carries both.
pub const CHUNK_KIND_MIXED: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HailstormError {
    #[error("cluster data was empty")]
    NullPointerData,

    #[error("cluster data is malformed")]
    InvalidArgument,

    #[error("cluster write sink rejected a block")]
    SinkFailure,

    #[error("cluster i/o request failed")]
    IoError,
}

/// Cluster file header, 64 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClusterHeader {
    pub magic: [u8; 4],
    pub header_version: u16,
    pub _pad0: u16,
    /// Size of the whole cluster in bytes.
    pub total_size: u64,
    /// Offset of the first chunk payload.
    pub data_offset: u64,
    /// Offset of the paths-data block (end of the table region).
    pub header_size: u64,
    pub version: u32,
    pub flags: u32,
    pub count_chunks: u16,
    pub count_resources: u16,
    pub _pad1: u32,
    /// Application-defined values carried verbatim.
    pub custom: [u8; 16],
}

/// Paths block descriptor, 16 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PathsInfo {
    pub offset: u64,
    pub size: u64,
}

/// Chunk descriptor, 32 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClusterChunk {
    pub offset: u64,
    pub size: u32,
    /// Size before any post-processing; equal to `size` in baked clusters.
    pub size_origin: u32,
    pub align: u8,
    /// One of the `CHUNK_KIND_*` values.
    pub kind: u8,
    pub count_entries: u16,
    pub _reserved: [u8; 12],
}

/// Resource entry, 32 bytes. Offsets are relative to the owning chunk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClusterResource {
    pub data_chunk: u16,
    pub meta_chunk: u16,
    pub size: u32,
    pub offset: u32,
    pub meta_size: u32,
    pub meta_offset: u32,
    pub path_size: u16,
    pub path_offset: u16,
    pub _reserved: [u8; 8],
}

/// Offset of the chunk table inside a cluster.
pub(crate) const CHUNKS_OFFSET: usize =
    std::mem::size_of::<ClusterHeader>() + std::mem::size_of::<PathsInfo>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_are_bit_exact() {
        assert_eq!(std::mem::size_of::<ClusterHeader>(), 64);
        assert_eq!(std::mem::size_of::<PathsInfo>(), 16);
        assert_eq!(std::mem::size_of::<ClusterChunk>(), 32);
        assert_eq!(std::mem::size_of::<ClusterResource>(), 32);
        assert_eq!(CHUNKS_OFFSET, 80);
    }
}
