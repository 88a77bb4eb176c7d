// read.rs - validated view over a cluster blob

use super::{
    ClusterChunk, ClusterHeader, ClusterResource, HailstormError, PathsInfo, CHUNKS_OFFSET,
    HAILSTORM_HEADER_VERSION, HAILSTORM_MAGIC, MAX_HEADER_SIZE,
};

/// Borrowed view over a cluster. Table entries are decoded on access so the
/// blob may sit at any alignment.
#[derive(Copy, Clone, Debug)]
pub struct ClusterView<'a> {
    bytes: &'a [u8],
    header: ClusterHeader,
    paths_info: PathsInfo,
}

impl<'a> ClusterView<'a> {
    /// Validate the header region and expose the cluster tables.
    pub fn read_header(bytes: &'a [u8]) -> Result<ClusterView<'a>, HailstormError> {
        if bytes.is_empty() {
            return Err(HailstormError::NullPointerData);
        }
        if bytes.len() < CHUNKS_OFFSET {
            return Err(HailstormError::InvalidArgument);
        }

        let header: ClusterHeader = bytemuck::pod_read_unaligned(&bytes[0..64]);
        if header.magic != HAILSTORM_MAGIC
            || header.header_version != HAILSTORM_HEADER_VERSION
            || header.header_size >= MAX_HEADER_SIZE
        {
            return Err(HailstormError::InvalidArgument);
        }

        let tables_end = CHUNKS_OFFSET
            + 32 * header.count_chunks as usize
            + 32 * header.count_resources as usize;
        if tables_end > bytes.len() || header.total_size as usize > bytes.len() {
            return Err(HailstormError::InvalidArgument);
        }

        let paths_info: PathsInfo = bytemuck::pod_read_unaligned(&bytes[64..80]);
        Ok(ClusterView {
            bytes,
            header,
            paths_info,
        })
    }

    pub fn header(&self) -> &ClusterHeader {
        &self.header
    }

    pub fn paths_info(&self) -> &PathsInfo {
        &self.paths_info
    }

    pub fn chunk_count(&self) -> usize {
        self.header.count_chunks as usize
    }

    pub fn resource_count(&self) -> usize {
        self.header.count_resources as usize
    }

    pub fn chunk(&self, index: usize) -> ClusterChunk {
        assert!(index < self.chunk_count());
        let at = CHUNKS_OFFSET + 32 * index;
        bytemuck::pod_read_unaligned(&self.bytes[at..at + 32])
    }

    pub fn resource(&self, index: usize) -> ClusterResource {
        assert!(index < self.resource_count());
        let at = CHUNKS_OFFSET + 32 * self.chunk_count() + 32 * index;
        bytemuck::pod_read_unaligned(&self.bytes[at..at + 32])
    }

    pub fn chunks(&self) -> impl Iterator<Item = ClusterChunk> + '_ {
        (0..self.chunk_count()).map(|index| self.chunk(index))
    }

    pub fn resources(&self) -> impl Iterator<Item = ClusterResource> + '_ {
        (0..self.resource_count()).map(|index| self.resource(index))
    }

    /// The raw paths block; empty when the descriptor points outside the
    /// supplied bytes.
    pub fn paths_data(&self) -> &'a [u8] {
        let start = self.paths_info.offset as usize;
        let end = start + self.paths_info.size as usize;
        self.bytes.get(start..end).unwrap_or(&[])
    }

    pub fn resource_path(&self, resource: &ClusterResource) -> Result<&'a str, HailstormError> {
        let paths = self.paths_data();
        let start = resource.path_offset as usize;
        let end = start + resource.path_size as usize;
        let bytes = paths.get(start..end).ok_or(HailstormError::InvalidArgument)?;
        std::str::from_utf8(bytes).map_err(|_| HailstormError::InvalidArgument)
    }

    pub fn resource_data(&self, resource: &ClusterResource) -> Result<&'a [u8], HailstormError> {
        let chunk = self.chunk(resource.data_chunk as usize);
        let start = (chunk.offset + resource.offset as u64) as usize;
        let end = start + resource.size as usize;
        self.bytes.get(start..end).ok_or(HailstormError::InvalidArgument)
    }

    pub fn resource_metadata(
        &self,
        resource: &ClusterResource,
    ) -> Result<&'a [u8], HailstormError> {
        let chunk = self.chunk(resource.meta_chunk as usize);
        let start = (chunk.offset + resource.meta_offset as u64) as usize;
        let end = start + resource.meta_size as usize;
        self.bytes.get(start..end).ok_or(HailstormError::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::super::write::{write_cluster, ResourceData, WriteData, WriteParams};
    use super::super::{ClusterChunk, CHUNK_KIND_DATA, CHUNK_KIND_META, FLAG_BAKED};
    use super::*;

    fn sample_cluster() -> Vec<u8> {
        let paths = ["maps/arena.level", "maps/arena.meta", "audio/theme.ogg"];
        let meta: &[&[u8]] = &[b"level-meta", b"aux", b"audio-meta-bytes"];
        let a = [0xAAu8; 300];
        let b = [0xBBu8; 77];
        let c = [0xCCu8; 512];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[
                ResourceData::new(&a),
                ResourceData::new(&b),
                ResourceData::new(&c),
            ],
            version: 3,
            flags: FLAG_BAKED,
            custom: *b"custom-values-16",
            ..WriteData::default()
        };
        write_cluster(&mut WriteParams::default_chunking(4096), &data).unwrap()
    }

    #[test]
    fn test_roundtrip_header_and_tables() {
        let blob = sample_cluster();
        let view = ClusterView::read_header(&blob).unwrap();

        assert_eq!(view.header().total_size as usize, blob.len());
        assert_eq!(view.header().version, 3);
        assert_eq!(view.header().flags, FLAG_BAKED);
        assert_eq!(&view.header().custom, b"custom-values-16");
        assert_eq!(view.resource_count(), 3);
        assert_eq!(
            view.header().header_size,
            view.paths_info().offset,
            "header_size is the offset of the paths-data block"
        );
    }

    #[test]
    fn test_roundtrip_resources() {
        let blob = sample_cluster();
        let view = ClusterView::read_header(&blob).unwrap();

        let expected_paths = ["maps/arena.level", "maps/arena.meta", "audio/theme.ogg"];
        let expected_meta: [&[u8]; 3] = [b"level-meta", b"aux", b"audio-meta-bytes"];
        let expected_sizes = [300usize, 77, 512];

        for (index, resource) in view.resources().enumerate() {
            assert_eq!(view.resource_path(&resource).unwrap(), expected_paths[index]);
            assert_eq!(view.resource_metadata(&resource).unwrap(), expected_meta[index]);
            let data = view.resource_data(&resource).unwrap();
            assert_eq!(data.len(), expected_sizes[index]);
            assert!(data.iter().all(|&b| b == [0xAA, 0xBB, 0xCC][index]));
        }
    }

    #[test]
    fn test_chunk_offsets_are_aligned() {
        let blob = sample_cluster();
        let view = ClusterView::read_header(&blob).unwrap();
        assert!(view.chunk_count() >= 1);
        for chunk in view.chunks() {
            assert_eq!(chunk.offset % 8, 0, "chunk payloads start 8-byte aligned");
            assert!(chunk.kind & (CHUNK_KIND_META | CHUNK_KIND_DATA) != 0);
        }
    }

    #[test]
    fn test_metadata_dedup_shares_offsets() {
        // Two resources mapping onto the same metadata entry.
        let paths = ["a.tex", "b.tex"];
        let meta: &[&[u8]] = &[b"shared-texture-meta", b"shared-texture-meta"];
        let a = [1u8; 64];
        let b = [2u8; 64];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            metadata_mapping: &[0, 0],
            data: &[ResourceData::new(&a), ResourceData::new(&b)],
            ..WriteData::default()
        };

        let blob = write_cluster(&mut WriteParams::default_chunking(4096), &data).unwrap();
        let view = ClusterView::read_header(&blob).unwrap();
        assert_eq!(view.resource_count(), 2);

        let first = view.resource(0);
        let second = view.resource(1);
        assert_eq!(first.meta_chunk, second.meta_chunk);
        assert_eq!(first.meta_offset, second.meta_offset);
        assert_eq!(first.meta_size, second.meta_size);
        assert_eq!(view.resource_metadata(&second).unwrap(), b"shared-texture-meta");

        // Data stays distinct.
        assert_ne!(first.offset, second.offset);
        assert_eq!(view.resource_data(&first).unwrap(), &a);
        assert_eq!(view.resource_data(&second).unwrap(), &b);
    }

    #[test]
    fn test_writer_spills_into_new_chunks() {
        // Chunk payload budget too small for both resources.
        let paths = ["one.bin", "two.bin"];
        let meta: &[&[u8]] = &[b"m1", b"m2"];
        let a = [7u8; 600];
        let b = [8u8; 600];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&a), ResourceData::new(&b)],
            ..WriteData::default()
        };

        let blob = write_cluster(&mut WriteParams::default_chunking(1024), &data).unwrap();
        let view = ClusterView::read_header(&blob).unwrap();
        assert!(view.chunk_count() >= 2, "second resource forced a new chunk");

        let first = view.resource(0);
        let second = view.resource(1);
        assert_ne!(first.data_chunk, second.data_chunk);
        assert_eq!(view.resource_data(&first).unwrap(), &a);
        assert_eq!(view.resource_data(&second).unwrap(), &b);
    }

    #[test]
    fn test_streamed_data_via_callback() {
        let paths = ["proc/noise.raw"];
        let meta: &[&[u8]] = &[b"noise"];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::streamed(48, 4)],
            ..WriteData::default()
        };

        let mut params = WriteParams::default_chunking(1024);
        params.resource_write = Some(Box::new(|index, slot| {
            slot.fill(index as u8 + 0x40);
        }));

        let blob = write_cluster(&mut params, &data).unwrap();
        let view = ClusterView::read_header(&blob).unwrap();
        let resource = view.resource(0);
        assert_eq!(view.resource_data(&resource).unwrap(), &[0x40u8; 48]);
    }

    #[test]
    fn test_invalid_headers_rejected() {
        assert_eq!(
            ClusterView::read_header(&[]).unwrap_err(),
            HailstormError::NullPointerData
        );
        assert_eq!(
            ClusterView::read_header(&[0u8; 40]).unwrap_err(),
            HailstormError::InvalidArgument
        );

        let mut blob = sample_cluster();
        blob[0] = b'X';
        assert_eq!(
            ClusterView::read_header(&blob).unwrap_err(),
            HailstormError::InvalidArgument
        );
    }

    #[test]
    fn test_initial_chunks_are_respected() {
        let paths = ["res.bin"];
        let meta: &[&[u8]] = &[b"m"];
        let payload = [5u8; 32];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&payload)],
            ..WriteData::default()
        };

        let mut params = WriteParams::default_chunking(2048);
        params.initial_chunks = vec![ClusterChunk {
            size: 2048,
            size_origin: 2048,
            align: 8,
            kind: super::super::CHUNK_KIND_MIXED,
            ..ClusterChunk::default()
        }];

        let blob = write_cluster(&mut params, &data).unwrap();
        let view = ClusterView::read_header(&blob).unwrap();
        assert_eq!(view.chunk_count(), 1);
        let chunk = view.chunk(0);
        assert_eq!(chunk.count_entries, 1);
        // Chunks shrink to their used, aligned size.
        assert!(chunk.size < 2048);
    }
}
