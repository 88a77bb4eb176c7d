// stream.rs - callback-driven cluster writer
//
// Same planning as the in-memory writer, but every byte leaves through a
// sink. Header regions go out first, then each resource's metadata and data
// at their final offsets; the resource table and paths block are staged in
// memory and written last. The first rejected block aborts the whole write:
// temporaries unwind and the sink never sees `close`.

use super::write::{build_header, plan_cluster, EmitCursor, WriteData, WriteParams};
use super::{ClusterResource, HailstormError, PathsInfo};

/// Destination of a streamed cluster write. Every writing call returns
/// whether the block was accepted.
pub trait StreamSink {
    fn open(&mut self, total_size: u64) -> bool;
    fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool;
    fn write_metadata(&mut self, index: u32, bytes: &[u8], offset: u64) -> bool;
    /// `bytes` is `None` for resources submitted without data; the sink is
    /// expected to produce `size` bytes itself.
    fn write_resource(&mut self, index: u32, bytes: Option<&[u8]>, size: u32, offset: u64)
        -> bool;
    fn close(&mut self);
}

fn accept(ok: bool) -> Result<(), HailstormError> {
    if ok {
        Ok(())
    } else {
        Err(HailstormError::SinkFailure)
    }
}

pub fn write_cluster_stream(
    params: &mut WriteParams<'_>,
    data: &WriteData<'_>,
    sink: &mut dyn StreamSink,
) -> Result<(), HailstormError> {
    let plan = plan_cluster(params, data)?;
    let count = data.paths.len();

    accept(sink.open(plan.total_size))?;

    let header = build_header(&plan, data);
    let paths_info = PathsInfo {
        offset: plan.offsets.paths_data,
        size: plan.paths_size,
    };
    accept(sink.write_header(bytemuck::bytes_of(&header), 0))?;
    accept(sink.write_header(bytemuck::bytes_of(&paths_info), 64))?;
    accept(sink.write_header(bytemuck::cast_slice(&plan.chunks), plan.offsets.chunks))?;

    let mut resources = vec![ClusterResource::default(); count];
    let mut paths_data = vec![0u8; plan.paths_size as usize];
    let mut cursor = EmitCursor::new(&plan, data);

    for idx in 0..count {
        let chunk_ref = plan.refs[idx];
        let data_chunk = plan.chunks[chunk_ref.data_chunk as usize];
        let meta_chunk = plan.chunks[chunk_ref.meta_chunk as usize];

        let (meta_idx, prior) = cursor.meta_emission(data, idx);
        let (meta_size, meta_offset) = if prior == u32::MAX {
            let meta = data.metadata[meta_idx];
            let at = cursor.place_meta(chunk_ref.meta_chunk, meta.len() as u64);
            accept(sink.write_metadata(meta_idx as u32, meta, meta_chunk.offset + at))?;
            (meta.len() as u32, at as u32)
        } else {
            let first = &resources[prior as usize];
            (first.meta_size, first.meta_offset)
        };

        let resource = data.data[idx];
        debug_assert!(resource.align <= data_chunk.align);
        let at = cursor.place_data(chunk_ref.data_chunk, resource.align, resource.size as u64);
        accept(sink.write_resource(
            idx as u32,
            resource.bytes,
            resource.size,
            data_chunk.offset + at,
        ))?;

        let path = data.paths[idx];
        let path_at = cursor.place_path(path);
        paths_data[path_at..path_at + path.len()].copy_from_slice(path.as_bytes());

        resources[idx] = ClusterResource {
            data_chunk: chunk_ref.data_chunk,
            meta_chunk: chunk_ref.meta_chunk,
            size: resource.size,
            offset: at as u32,
            meta_size,
            meta_offset,
            path_size: path.len() as u16,
            path_offset: path_at as u16,
            _reserved: [0; 8],
        };
    }

    accept(sink.write_header(&paths_data, plan.offsets.paths_data))?;
    accept(sink.write_header(bytemuck::cast_slice(&resources), plan.offsets.resources))?;
    sink.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::read::ClusterView;
    use super::super::write::{ResourceData, WriteData, WriteParams};
    use super::*;

    /// Sink assembling the cluster into one buffer, mirroring a file.
    struct BufferSink {
        buffer: Vec<u8>,
        opened: bool,
        closed: bool,
    }

    impl BufferSink {
        fn new() -> BufferSink {
            BufferSink {
                buffer: Vec::new(),
                opened: false,
                closed: false,
            }
        }

        fn put(&mut self, bytes: &[u8], offset: u64) {
            let end = offset as usize + bytes.len();
            assert!(end <= self.buffer.len(), "sink write past announced size");
            self.buffer[offset as usize..end].copy_from_slice(bytes);
        }
    }

    impl StreamSink for BufferSink {
        fn open(&mut self, total_size: u64) -> bool {
            self.opened = true;
            self.buffer = vec![0; total_size as usize];
            true
        }

        fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool {
            self.put(bytes, offset);
            true
        }

        fn write_metadata(&mut self, _index: u32, bytes: &[u8], offset: u64) -> bool {
            self.put(bytes, offset);
            true
        }

        fn write_resource(
            &mut self,
            index: u32,
            bytes: Option<&[u8]>,
            size: u32,
            offset: u64,
        ) -> bool {
            match bytes {
                Some(bytes) => self.put(bytes, offset),
                None => {
                    let filler = vec![index as u8; size as usize];
                    self.put(&filler, offset);
                }
            }
            true
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Sink rejecting the n-th writing call.
    struct FailingSink {
        inner: BufferSink,
        remaining: u32,
    }

    impl FailingSink {
        fn countdown(&mut self) -> bool {
            if self.remaining == 0 {
                return false;
            }
            self.remaining -= 1;
            true
        }
    }

    impl StreamSink for FailingSink {
        fn open(&mut self, total_size: u64) -> bool {
            self.inner.open(total_size)
        }

        fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool {
            self.countdown() && self.inner.write_header(bytes, offset)
        }

        fn write_metadata(&mut self, index: u32, bytes: &[u8], offset: u64) -> bool {
            self.countdown() && self.inner.write_metadata(index, bytes, offset)
        }

        fn write_resource(
            &mut self,
            index: u32,
            bytes: Option<&[u8]>,
            size: u32,
            offset: u64,
        ) -> bool {
            self.countdown() && self.inner.write_resource(index, bytes, size, offset)
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[test]
    fn test_streamed_cluster_matches_sync_writer() {
        let paths = ["textures/grass.dds", "textures/dirt.dds"];
        let meta: &[&[u8]] = &[b"m-grass", b"m-dirt"];
        let payload_a = [1u8; 100];
        let payload_b = [2u8; 40];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&payload_a), ResourceData::new(&payload_b)],
            ..WriteData::default()
        };

        let sync_blob =
            super::super::write::write_cluster(&mut WriteParams::default_chunking(4096), &data)
                .unwrap();

        let mut sink = BufferSink::new();
        write_cluster_stream(&mut WriteParams::default_chunking(4096), &data, &mut sink).unwrap();
        assert!(sink.opened && sink.closed);
        assert_eq!(sink.buffer, sync_blob);

        let view = ClusterView::read_header(&sink.buffer).unwrap();
        assert_eq!(view.resource_count(), 2);
        let first = view.resource(0);
        assert_eq!(view.resource_data(&first).unwrap(), &payload_a);
        assert_eq!(view.resource_path(&first).unwrap(), paths[0]);
    }

    #[test]
    fn test_streamed_resources_without_bytes() {
        let paths = ["gen/heightmap.raw"];
        let meta: &[&[u8]] = &[b"meta"];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::streamed(32, 8)],
            ..WriteData::default()
        };

        let mut sink = BufferSink::new();
        write_cluster_stream(&mut WriteParams::default_chunking(1024), &data, &mut sink).unwrap();

        let view = ClusterView::read_header(&sink.buffer).unwrap();
        let resource = view.resource(0);
        // BufferSink fills streamed resources with their index.
        assert_eq!(view.resource_data(&resource).unwrap(), &[0u8; 32]);
    }

    #[test]
    fn test_sink_failure_aborts_without_close() {
        let paths = ["a.bin"];
        let meta: &[&[u8]] = &[b"m"];
        let payload = [9u8; 16];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&payload)],
            ..WriteData::default()
        };

        for failing_call in 1..=5 {
            let mut sink = FailingSink {
                inner: BufferSink::new(),
                remaining: failing_call - 1,
            };
            let result = write_cluster_stream(
                &mut WriteParams::default_chunking(1024),
                &data,
                &mut sink,
            );
            assert_eq!(result, Err(HailstormError::SinkFailure));
            assert!(!sink.inner.closed, "failed write must not close the sink");
        }
    }
}
