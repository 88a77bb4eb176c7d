// write.rs - cluster planning and the synchronous in-memory writer
//
// Planning walks the resources once, consulting the chunk-selection
// callbacks. When a resource does not fit the selected chunk a new chunk is
// appended and the same resource is retried without advancing. Emission then
// walks the resources again, writing metadata (deduplicated), data and paths
// at the planned offsets.

use super::{
    ClusterChunk, ClusterHeader, ClusterResource, HailstormError, PathsInfo, CHUNKS_OFFSET,
    CHUNK_KIND_DATA, CHUNK_KIND_META, CHUNK_KIND_MIXED, HAILSTORM_HEADER_VERSION, HAILSTORM_MAGIC,
};

/// Chunk selection result for one resource.
#[derive(Copy, Clone, Debug, Default)]
pub struct ChunkRef {
    pub data_chunk: u16,
    pub meta_chunk: u16,
    pub data_create: bool,
    pub meta_create: bool,
}

/// One resource's data payload. `bytes: None` reserves `size` bytes that the
/// `resource_write` callback fills during emission.
#[derive(Copy, Clone, Debug)]
pub struct ResourceData<'a> {
    pub bytes: Option<&'a [u8]>,
    pub size: u32,
    pub align: u8,
}

impl<'a> ResourceData<'a> {
    pub fn new(bytes: &'a [u8]) -> ResourceData<'a> {
        ResourceData {
            bytes: Some(bytes),
            size: bytes.len() as u32,
            align: 4,
        }
    }

    pub fn streamed(size: u32, align: u8) -> ResourceData<'a> {
        ResourceData {
            bytes: None,
            size,
            align,
        }
    }
}

/// Everything a cluster is written from.
pub struct WriteData<'a> {
    pub paths: &'a [&'a str],
    /// Opaque metadata payloads; indexed directly, or through
    /// `metadata_mapping` when metadata is shared between resources.
    pub metadata: &'a [&'a [u8]],
    /// resource index -> canonical resource index owning the metadata.
    /// Empty when every resource carries its own metadata.
    pub metadata_mapping: &'a [u32],
    pub data: &'a [ResourceData<'a>],
    pub version: u32,
    pub flags: u32,
    pub custom: [u8; 16],
}

impl Default for WriteData<'_> {
    fn default() -> Self {
        WriteData {
            paths: &[],
            metadata: &[],
            metadata_mapping: &[],
            data: &[],
            version: 0,
            flags: 0,
            custom: [0; 16],
        }
    }
}

type SelectChunkFn<'a> = dyn FnMut(&[u8], &ResourceData<'_>, &[ClusterChunk]) -> ChunkRef + 'a;
type CreateChunkFn<'a> = dyn FnMut(&[u8], &ResourceData<'_>, &ClusterChunk) -> ClusterChunk + 'a;
type ResourceWriteFn<'a> = dyn FnMut(u32, &mut [u8]) + 'a;

pub struct WriteParams<'a> {
    pub initial_chunks: Vec<ClusterChunk>,
    /// Pick the chunks a resource should land in.
    pub select_chunk: Box<SelectChunkFn<'a>>,
    /// Produce a fresh chunk when the selected one ran out of space.
    pub create_chunk: Box<CreateChunkFn<'a>>,
    /// Streams data for resources submitted without bytes.
    pub resource_write: Option<Box<ResourceWriteFn<'a>>>,
}

impl<'a> WriteParams<'a> {
    /// Mixed chunks of a fixed payload size, appended as resources stop
    /// fitting.
    pub fn default_chunking(chunk_size: u32) -> WriteParams<'a> {
        WriteParams {
            initial_chunks: Vec::new(),
            select_chunk: Box::new(|_, _, chunks| {
                let last = (chunks.len() - 1) as u16;
                ChunkRef {
                    data_chunk: last,
                    meta_chunk: last,
                    ..ChunkRef::default()
                }
            }),
            create_chunk: Box::new(move |_, _, _| ClusterChunk {
                size: chunk_size,
                size_origin: chunk_size,
                align: 8,
                kind: CHUNK_KIND_MIXED,
                ..ClusterChunk::default()
            }),
            resource_write: None,
        }
    }
}

pub(crate) struct Offsets {
    pub chunks: u64,
    pub resources: u64,
    pub paths_data: u64,
    pub data: u64,
}

pub(crate) struct ClusterPlan {
    pub chunks: Vec<ClusterChunk>,
    pub refs: Vec<ChunkRef>,
    pub paths_size: u64,
    pub offsets: Offsets,
    pub total_size: u64,
    pub requires_stream: bool,
}

pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Placement rule shared by planning and emission: metadata entries start at
/// 8-byte boundaries, data entries at their own alignment.
fn place(used: u64, align: u64, size: u64) -> (u64, u64) {
    let at = align_up(used, align);
    (at, at + size)
}

pub(crate) fn plan_cluster(
    params: &mut WriteParams<'_>,
    data: &WriteData<'_>,
) -> Result<ClusterPlan, HailstormError> {
    let count = data.paths.len();
    if count != data.data.len() {
        return Err(HailstormError::InvalidArgument);
    }
    let has_mapping = !data.metadata_mapping.is_empty();
    if has_mapping {
        if data.metadata_mapping.len() < count {
            return Err(HailstormError::InvalidArgument);
        }
    } else if data.metadata.len() != count {
        return Err(HailstormError::InvalidArgument);
    }

    let mut chunks = params.initial_chunks.clone();
    if chunks.is_empty() {
        let template = ClusterChunk {
            align: 8,
            kind: CHUNK_KIND_MIXED,
            ..ClusterChunk::default()
        };
        let empty = ResourceData::streamed(0, 8);
        chunks.push((params.create_chunk)(&[], &empty, &template));
    }

    let mut sizes: Vec<u64> = vec![0; chunks.len()];
    let mut refs = vec![ChunkRef::default(); count];
    let mut metatracker = vec![u32::MAX; data.metadata_mapping.len()];
    let mut requires_stream = false;

    // An empty paths block still carries eight zero bytes.
    let mut paths_size: u64 = 8;

    let mut idx = 0usize;
    while idx < count {
        let metadata_idx = if has_mapping {
            data.metadata_mapping[idx] as usize
        } else {
            idx
        };
        let meta = data.metadata[metadata_idx];
        let resource = data.data[idx];
        requires_stream |= resource.bytes.is_none();

        let mut chunk_ref = (params.select_chunk)(meta, &resource, &chunks);
        assert!((chunk_ref.data_chunk as usize) < chunks.len());
        assert!((chunk_ref.meta_chunk as usize) < chunks.len());

        // Shared metadata reuses the chunk its first emitter landed in.
        let mut shared_meta = false;
        if has_mapping && metatracker[metadata_idx] != u32::MAX {
            shared_meta = true;
            chunk_ref.meta_chunk = refs[metadata_idx].meta_chunk;
        }

        let meta_size = meta.len() as i64;
        let data_size = resource.size as i64;
        let data_remaining = chunks[chunk_ref.data_chunk as usize].size as i64
            - sizes[chunk_ref.data_chunk as usize] as i64
            - resource.align as i64;
        let meta_remaining = chunks[chunk_ref.meta_chunk as usize].size as i64
            - sizes[chunk_ref.meta_chunk as usize] as i64
            - 8;

        if chunk_ref.data_chunk == chunk_ref.meta_chunk {
            chunk_ref.data_create |= (data_remaining - meta_size) < data_size;
            // One new chunk covers both roles when they share.
            chunk_ref.meta_create = false;
        } else {
            chunk_ref.data_create |= data_remaining < data_size;
            chunk_ref.meta_create |= meta_remaining < meta_size;
        }

        if chunk_ref.data_create {
            let template = chunks[chunk_ref.data_chunk as usize];
            let new_chunk = (params.create_chunk)(meta, &resource, &template);
            debug_assert!(
                (chunk_ref.data_chunk == chunk_ref.meta_chunk
                    && new_chunk.kind == CHUNK_KIND_MIXED)
                    || new_chunk.kind == CHUNK_KIND_DATA,
                "created chunk kind does not fit its role"
            );
            chunks.push(new_chunk);
            sizes.push(0);
        }
        if chunk_ref.meta_create {
            debug_assert!(!shared_meta);
            let template = chunks[chunk_ref.meta_chunk as usize];
            let new_chunk = (params.create_chunk)(meta, &resource, &template);
            debug_assert_eq!(new_chunk.kind, CHUNK_KIND_META);
            chunks.push(new_chunk);
            sizes.push(0);
        }
        if chunk_ref.data_create || chunk_ref.meta_create {
            // Selection reruns against the grown chunk list; the resource
            // cursor stays put.
            continue;
        }

        if has_mapping && metatracker[metadata_idx] == u32::MAX {
            metatracker[metadata_idx] = idx as u32;
        }

        debug_assert!(chunks[chunk_ref.meta_chunk as usize].kind & CHUNK_KIND_META != 0);
        debug_assert!(chunks[chunk_ref.data_chunk as usize].kind & CHUNK_KIND_DATA != 0);

        refs[idx] = chunk_ref;
        chunks[chunk_ref.data_chunk as usize].count_entries += 1;
        if !shared_meta {
            // Metadata counts once, and only separately from mixed chunks.
            if chunk_ref.data_chunk != chunk_ref.meta_chunk {
                chunks[chunk_ref.meta_chunk as usize].count_entries += 1;
            }
            let (_, used) = place(sizes[chunk_ref.meta_chunk as usize], 8, meta.len() as u64);
            sizes[chunk_ref.meta_chunk as usize] = used;
        }
        let (_, used) = place(
            sizes[chunk_ref.data_chunk as usize],
            resource.align.max(1) as u64,
            resource.size as u64,
        );
        sizes[chunk_ref.data_chunk as usize] = used;

        let path = data.paths[idx];
        assert!(!path.is_empty(), "resource paths must not be empty");
        paths_size += path.len() as u64 + 1;

        idx += 1;
    }

    paths_size = align_up(paths_size, 8);

    // Shrink chunks to their used size, aligned to the chunk boundary.
    for (chunk, &used) in chunks.iter_mut().zip(&sizes) {
        chunk.size = align_up(used, chunk.align.max(1) as u64) as u32;
        chunk.size_origin = chunk.size;
    }

    let chunks_offset = CHUNKS_OFFSET as u64;
    let resources_offset = chunks_offset + 32 * chunks.len() as u64;
    let paths_data_offset = resources_offset + 32 * count as u64;
    let data_offset = paths_data_offset + paths_size;

    let mut offset = data_offset;
    let mut total = data_offset;
    for chunk in &mut chunks {
        chunk.offset = offset;
        total = offset + chunk.size as u64;
        offset = align_up(total, 8);
    }

    Ok(ClusterPlan {
        chunks,
        refs,
        paths_size,
        offsets: Offsets {
            chunks: chunks_offset,
            resources: resources_offset,
            paths_data: paths_data_offset,
            data: data_offset,
        },
        total_size: total,
        requires_stream,
    })
}

pub(crate) fn build_header(plan: &ClusterPlan, data: &WriteData<'_>) -> ClusterHeader {
    ClusterHeader {
        magic: HAILSTORM_MAGIC,
        header_version: HAILSTORM_HEADER_VERSION,
        _pad0: 0,
        total_size: plan.total_size,
        data_offset: plan.offsets.data,
        header_size: plan.offsets.paths_data,
        version: data.version,
        flags: data.flags,
        count_chunks: plan.chunks.len() as u16,
        count_resources: data.paths.len() as u16,
        _pad1: 0,
        custom: data.custom,
    }
}

/// Per-resource emission bookkeeping shared by the sync and stream writers.
pub(crate) struct EmitCursor {
    used: Vec<u64>,
    metatracker: Vec<u32>,
    paths_offset: usize,
}

impl EmitCursor {
    pub(crate) fn new(plan: &ClusterPlan, data: &WriteData<'_>) -> EmitCursor {
        EmitCursor {
            used: vec![0; plan.chunks.len()],
            metatracker: vec![u32::MAX; data.metadata_mapping.len()],
            paths_offset: 0,
        }
    }

    /// Resolve the canonical metadata index for `idx`, remembering the first
    /// emitter. Returns `(metadata_index, prior_emitter)`.
    pub(crate) fn meta_emission(&mut self, data: &WriteData<'_>, idx: usize) -> (usize, u32) {
        if data.metadata_mapping.is_empty() {
            return (idx, u32::MAX);
        }
        let meta_idx = data.metadata_mapping[idx] as usize;
        let prior = std::mem::replace(&mut self.metatracker[meta_idx], idx as u32);
        (meta_idx, prior)
    }

    /// Reserve space for a metadata entry; returns its chunk-relative offset.
    pub(crate) fn place_meta(&mut self, chunk: u16, size: u64) -> u64 {
        let (at, used) = place(self.used[chunk as usize], 8, size);
        self.used[chunk as usize] = used;
        at
    }

    /// Reserve space for a data entry; returns its chunk-relative offset.
    pub(crate) fn place_data(&mut self, chunk: u16, align: u8, size: u64) -> u64 {
        let (at, used) = place(self.used[chunk as usize], align.max(1) as u64, size);
        self.used[chunk as usize] = used;
        at
    }

    /// Reserve the path slot for one resource; returns its block offset.
    pub(crate) fn place_path(&mut self, path: &str) -> usize {
        let at = self.paths_offset;
        self.paths_offset += path.len() + 1;
        at
    }
}

/// Write a cluster into one freshly allocated buffer.
pub fn write_cluster(
    params: &mut WriteParams<'_>,
    data: &WriteData<'_>,
) -> Result<Vec<u8>, HailstormError> {
    let plan = plan_cluster(params, data)?;
    assert!(
        !plan.requires_stream || params.resource_write.is_some(),
        "resources without data require the resource_write callback"
    );

    let count = data.paths.len();
    let mut blob = vec![0u8; plan.total_size as usize];

    let header = build_header(&plan, data);
    let paths_info = PathsInfo {
        offset: plan.offsets.paths_data,
        size: plan.paths_size,
    };
    blob[0..64].copy_from_slice(bytemuck::bytes_of(&header));
    blob[64..80].copy_from_slice(bytemuck::bytes_of(&paths_info));
    {
        let at = plan.offsets.chunks as usize;
        blob[at..at + 32 * plan.chunks.len()].copy_from_slice(bytemuck::cast_slice(&plan.chunks));
    }

    let mut resources = vec![ClusterResource::default(); count];
    let mut cursor = EmitCursor::new(&plan, data);

    for idx in 0..count {
        let chunk_ref = plan.refs[idx];
        let data_chunk = plan.chunks[chunk_ref.data_chunk as usize];
        let meta_chunk = plan.chunks[chunk_ref.meta_chunk as usize];

        let (meta_idx, prior) = cursor.meta_emission(data, idx);
        let (meta_size, meta_offset) = if prior == u32::MAX {
            let meta = data.metadata[meta_idx];
            let at = cursor.place_meta(chunk_ref.meta_chunk, meta.len() as u64);
            let write_at = (meta_chunk.offset + at) as usize;
            blob[write_at..write_at + meta.len()].copy_from_slice(meta);
            (meta.len() as u32, at as u32)
        } else {
            let first = &resources[prior as usize];
            (first.meta_size, first.meta_offset)
        };

        let resource = data.data[idx];
        debug_assert!(
            resource.align <= data_chunk.align,
            "resource data alignment exceeds its chunk alignment"
        );
        let at = cursor.place_data(chunk_ref.data_chunk, resource.align, resource.size as u64);
        let write_at = (data_chunk.offset + at) as usize;
        let slot = &mut blob[write_at..write_at + resource.size as usize];
        match resource.bytes {
            Some(bytes) => slot.copy_from_slice(bytes),
            None => {
                let stream = params
                    .resource_write
                    .as_mut()
                    .expect("checked before emission");
                stream(idx as u32, slot);
            }
        }

        let path = data.paths[idx];
        let path_at = cursor.place_path(path);
        assert!(path_at + path.len() < plan.paths_size as usize);
        assert!(path_at <= u16::MAX as usize && path.len() <= u16::MAX as usize);
        let write_at = plan.offsets.paths_data as usize + path_at;
        blob[write_at..write_at + path.len()].copy_from_slice(path.as_bytes());
        // The NUL terminator and the block's zero tail are already in place.

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

    let at = plan.offsets.resources as usize;
    blob[at..at + 32 * count].copy_from_slice(bytemuck::cast_slice(&resources));
    Ok(blob)
}
