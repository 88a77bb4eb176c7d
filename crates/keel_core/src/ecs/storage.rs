// storage.rs - entity storage and the structural operation executor
//
// Storage owns the data blocks of every registered archetype plus the slot
// table mapping entity index -> (archetype, block, row). All structural
// mutation flows through `execute_operations`, which applies a batch in
// submission order and refuses to run while any query is still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::archetype::{Archetype, ArchetypeIndex, ArchetypeRecord, TAG_OFFSET};
use super::block::{BlockPool, DataBlock};
use super::component::{ComponentId, ENTITY_COMPONENT};
use super::entity::{Entity, EntityIndex};
use super::operations::{ComponentData, EntityOperations};
use crate::memory::{Allocator, HostAllocator};

/// Packed entity location: `{ archetype:16, block:16, index:32 }`.
/// Archetype 0 means the entity has no stored data.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityDataSlot(u64);

impl EntityDataSlot {
    pub fn new(archetype: u32, block: u32, index: u32) -> EntityDataSlot {
        debug_assert!(archetype < (1 << 16), "archetype instance out of slot range");
        debug_assert!(block < (1 << 16), "block index out of slot range");
        EntityDataSlot((archetype as u64) | ((block as u64) << 16) | ((index as u64) << 32))
    }

    #[inline]
    pub fn archetype(self) -> u32 {
        (self.0 & 0xFFFF) as u32
    }

    #[inline]
    pub fn block(self) -> u32 {
        ((self.0 >> 16) & 0xFFFF) as u32
    }

    #[inline]
    pub fn index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn is_stored(self) -> bool {
        self.archetype() != 0
    }
}

/// Per-component counters guarding structural mutation against in-flight
/// queries. Readers bump `stage_next` on entry and `stage_executed` on exit.
#[derive(Default)]
pub struct QueryAccessTracker {
    pub stage_next: AtomicU32,
    pub stage_executed: AtomicU32,
}

impl QueryAccessTracker {
    pub fn is_quiescent(&self) -> bool {
        self.stage_next.load(Ordering::Relaxed) == self.stage_executed.load(Ordering::Relaxed)
    }
}

pub struct EntityStorage {
    entity_index: EntityIndex,
    archetypes: ArchetypeIndex,
    /// Per-archetype pool and block list, parallel to the archetype records.
    pools: Vec<BlockPool>,
    blocks: Vec<Vec<DataBlock>>,
    data_slots: Vec<EntityDataSlot>,
    trackers: HashMap<ComponentId, Arc<QueryAccessTracker>>,
    allocator: Arc<dyn Allocator + Send + Sync>,
}

impl EntityStorage {
    pub fn new() -> EntityStorage {
        EntityStorage::with_allocator(Arc::new(HostAllocator))
    }

    pub fn with_allocator(allocator: Arc<dyn Allocator + Send + Sync>) -> EntityStorage {
        EntityStorage {
            entity_index: EntityIndex::default(),
            archetypes: ArchetypeIndex::new(),
            pools: vec![BlockPool::new(Arc::clone(&allocator))],
            blocks: vec![Vec::new()],
            data_slots: Vec::new(),
            trackers: HashMap::new(),
            allocator,
        }
    }

    pub fn entities(&mut self) -> &mut EntityIndex {
        &mut self.entity_index
    }

    pub fn entity_index(&self) -> &EntityIndex {
        &self.entity_index
    }

    /// Register an archetype and prepare its pool, block list and access
    /// trackers. Re-registration returns the existing id.
    pub fn register_archetype(&mut self, components: &[ComponentId]) -> Archetype {
        let (archetype, created) = self.archetypes.register(components);
        if created {
            self.pools.push(BlockPool::new(Arc::clone(&self.allocator)));
            self.blocks.push(Vec::new());

            let record = self.archetypes.record(self.archetypes.len() as u32 - 1);
            for &component in &record.components {
                self.trackers
                    .entry(component)
                    .or_insert_with(|| Arc::new(QueryAccessTracker::default()));
            }
        }
        archetype
    }

    pub fn archetype_instance(&self, archetype: Archetype) -> Option<u32> {
        self.archetypes.instance_of(archetype)
    }

    pub(crate) fn record(&self, instance: u32) -> Arc<ArchetypeRecord> {
        Arc::clone(self.archetypes.record(instance))
    }

    pub(crate) fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub(crate) fn blocks_of(&self, instance: u32) -> &[DataBlock] {
        &self.blocks[instance as usize]
    }

    pub(crate) fn blocks_of_mut(&mut self, instance: u32) -> &mut [DataBlock] {
        &mut self.blocks[instance as usize]
    }

    pub fn tracker(&self, component: ComponentId) -> Option<&Arc<QueryAccessTracker>> {
        self.trackers.get(&component)
    }

    /// Location of a live, stored entity.
    pub fn slot_of(&self, entity: Entity) -> Option<EntityDataSlot> {
        if !self.entity_index.is_alive(entity) {
            return None;
        }
        let slot = *self.data_slots.get(entity.index() as usize)?;
        slot.is_stored().then_some(slot)
    }

    /// Apply a batch of structural operations in submission order.
    pub fn execute_operations(&mut self, operations: &EntityOperations) {
        if self.data_slots.len() < self.entity_index.count() {
            self.data_slots
                .resize(self.entity_index.count(), EntityDataSlot::default());
        }

        // Every query must have retired before storage may change shape.
        for tracker in self.trackers.values() {
            let executed = tracker.stage_executed.swap(0, Ordering::Relaxed);
            let next = tracker.stage_next.swap(0, Ordering::Relaxed);
            debug_assert_eq!(
                executed, next,
                "structural mutation while a query is in flight"
            );
        }

        for op in operations.iter() {
            if op.entities.is_empty() {
                tracing::error!("ill-formed entity operation, no entities found; skipping");
                continue;
            }

            #[cfg(debug_assertions)]
            self.assert_single_source_archetype(&op.entities);

            let src_slot = self.data_slots[op.entities[0].index() as usize];

            match (op.archetype, &op.data) {
                (Some(archetype), data) => {
                    let Some(dst_instance) = self.archetypes.instance_of(archetype) else {
                        tracing::warn!(
                            archetype = archetype.0,
                            "operation targets an unregistered archetype; skipping"
                        );
                        continue;
                    };

                    if !src_slot.is_stored() {
                        self.op_add(dst_instance, &op.entities, data.as_ref());
                    } else {
                        debug_assert_eq!(
                            op.entities.len(),
                            1,
                            "moving more than one entity between archetypes is not allowed"
                        );
                        self.op_move(src_slot, dst_instance, op.entities[0], data.as_ref());
                    }
                }
                (None, Some(data)) => {
                    if !src_slot.is_stored() {
                        tracing::warn!("component update for an entity without storage; skipping");
                        continue;
                    }
                    debug_assert_eq!(op.entities.len(), 1, "updates are single-entity");
                    self.op_update(src_slot, data);
                }
                (None, None) => {
                    self.op_remove(&op.entities);
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn assert_single_source_archetype(&self, entities: &[Entity]) {
        let mut expected = 0u32;
        let mut same = true;
        for entity in entities {
            let archetype = self
                .data_slots
                .get(entity.index() as usize)
                .copied()
                .unwrap_or_default()
                .archetype();
            if expected == 0 {
                expected = archetype;
            } else if archetype != 0 {
                same &= expected == archetype;
            }
        }
        debug_assert!(
            same,
            "entities in one operation span multiple source archetypes"
        );
    }

    /// Place entities into a destination archetype, spilling over block
    /// boundaries as needed.
    fn op_add(&mut self, instance: u32, entities: &[Entity], provided: Option<&ComponentData>) {
        let record = Arc::clone(self.archetypes.record(instance));

        let mut processed = 0usize;
        while processed < entities.len() {
            let block_index = {
                let blocks = &mut self.blocks[instance as usize];
                let found = blocks
                    .iter()
                    .position(|block| block.entity_count < block.entity_count_max);
                match found {
                    Some(index) => index,
                    None => {
                        let block =
                            self.pools[instance as usize].request(record.entity_count_max);
                        blocks.push(block);
                        blocks.len() - 1
                    }
                }
            };

            let (start, span) = {
                let block = &mut self.blocks[instance as usize][block_index];
                let start = block.entity_count;
                let available = (block.entity_count_max - start) as usize;
                let span = available.min(entities.len() - processed);
                block.entity_count += span as u32;
                (start, span)
            };

            self.write_rows(
                instance,
                block_index as u32,
                start,
                &record,
                &entities[processed..processed + span],
                provided,
                processed,
            );
            processed += span;
        }
    }

    /// Copy provided/zero data into rows `[start, start+entities.len())`.
    #[allow(clippy::too_many_arguments)]
    fn write_rows(
        &mut self,
        instance: u32,
        block_index: u32,
        start: u32,
        record: &ArchetypeRecord,
        entities: &[Entity],
        provided: Option<&ComponentData>,
        provided_row: usize,
    ) {
        let count = entities.len();
        {
            let block = &mut self.blocks[instance as usize][block_index as usize];
            let bytes = block.bytes_mut();

            for (col, &component) in record.components.iter().enumerate() {
                let offset = record.offsets[col];
                if offset == TAG_OFFSET {
                    continue;
                }
                let size = record.sizes[col] as usize;
                let at = offset as usize + size * start as usize;
                let dst = &mut bytes[at..at + size * count];

                if component == ENTITY_COMPONENT {
                    dst.copy_from_slice(bytemuck::cast_slice(entities));
                } else if let Some(column) = provided.and_then(|p| p.find(component)) {
                    debug_assert_eq!(
                        column.size as usize, size,
                        "provided component size does not match the archetype column"
                    );
                    let from = size * provided_row;
                    dst.copy_from_slice(&column.bytes[from..from + size * count]);
                } else {
                    // Components absent from the source are zero-filled.
                    dst.fill(0);
                }
            }
        }

        for (i, &entity) in entities.iter().enumerate() {
            self.data_slots[entity.index() as usize] =
                EntityDataSlot::new(instance, block_index, start + i as u32);
        }
    }

    /// Move one entity to another archetype: copy the component
    /// intersection, overlay provided data, then free the source row.
    fn op_move(
        &mut self,
        src_slot: EntityDataSlot,
        dst_instance: u32,
        entity: Entity,
        provided: Option<&ComponentData>,
    ) {
        let src_instance = src_slot.archetype();
        let src_record = Arc::clone(self.archetypes.record(src_instance));
        let dst_record = Arc::clone(self.archetypes.record(dst_instance));

        // Capture the intersection row before storage shifts underneath us.
        let mut builder = ComponentData::builder();
        let mut captured_any = false;
        {
            let block = &self.blocks[src_instance as usize][src_slot.block() as usize];
            let bytes = block.bytes();
            for (col, &component) in src_record.components.iter().enumerate() {
                if component == ENTITY_COMPONENT || src_record.offsets[col] == TAG_OFFSET {
                    continue;
                }
                if !dst_record.contains(component) {
                    continue;
                }
                let size = src_record.sizes[col] as usize;
                let at = src_record.offsets[col] as usize + size * src_slot.index() as usize;
                builder = builder.column_bytes(component, size as u32, &bytes[at..at + size]);
                captured_any = true;
            }
        }
        let captured = builder.build();

        self.op_add(
            dst_instance,
            std::slice::from_ref(&entity),
            captured_any.then_some(&captured),
        );

        if let Some(data) = provided {
            let new_slot = self.data_slots[entity.index() as usize];
            self.op_update(new_slot, data);
        }

        self.remove_rows_compact(src_instance, src_slot.block(), src_slot.index(), 1);
    }

    /// Overwrite matching components of one stored row in place.
    fn op_update(&mut self, slot: EntityDataSlot, data: &ComponentData) {
        let record = Arc::clone(self.archetypes.record(slot.archetype()));
        let block = &mut self.blocks[slot.archetype() as usize][slot.block() as usize];
        let bytes = block.bytes_mut();

        for column in &data.columns {
            if column.component == ENTITY_COMPONENT {
                continue;
            }
            // Only data the archetype actually stores is updated.
            let Some(col) = record.column_of(column.component) else {
                continue;
            };
            if record.offsets[col] == TAG_OFFSET {
                continue;
            }
            let size = record.sizes[col] as usize;
            debug_assert_eq!(column.size as usize, size);
            let at = record.offsets[col] as usize + size * slot.index() as usize;
            bytes[at..at + size].copy_from_slice(&column.bytes[..size]);
        }
    }

    /// Remove entities, batching contiguous runs per block so each hole is
    /// repaired with a single tail relocation.
    fn op_remove(&mut self, entities: &[Entity]) {
        let mut i = 0usize;
        while i < entities.len() {
            let slot = self.data_slots[entities[i].index() as usize];
            if !slot.is_stored() {
                tracing::warn!("remove for an entity without storage; skipping");
                i += 1;
                continue;
            }

            // Grow the run while following entities extend it up or down
            // inside the same block.
            let mut start = slot.index();
            let mut span = 1u32;
            while i + (span as usize) < entities.len() {
                let next = self.data_slots[entities[i + span as usize].index() as usize];
                if next.archetype() != slot.archetype() || next.block() != slot.block() {
                    break;
                }
                if next.index() == start + span {
                    span += 1;
                } else if next.index() + 1 == start {
                    start -= 1;
                    span += 1;
                } else {
                    break;
                }
            }

            for k in 0..span as usize {
                self.data_slots[entities[i + k].index() as usize] = EntityDataSlot::default();
            }
            self.remove_rows_compact(slot.archetype(), slot.block(), start, span);
            i += span as usize;
        }
    }

    /// Delete rows `[start, start+span)` from a block, relocating a tail
    /// segment of equal length into the hole in one copy per column.
    fn remove_rows_compact(&mut self, instance: u32, block_index: u32, start: u32, span: u32) {
        let record = Arc::clone(self.archetypes.record(instance));

        let moved: Vec<Entity> = {
            let block = &mut self.blocks[instance as usize][block_index as usize];
            let count = block.entity_count;
            debug_assert!(
                start + span <= count,
                "removing rows beyond the block's entity count"
            );

            let tail_len = count - (start + span);
            let hole = span.min(tail_len);
            let mut moved = Vec::new();

            if hole > 0 {
                let src_row = count - hole;
                let bytes = block.bytes_mut();

                for (col, _) in record.components.iter().enumerate() {
                    let offset = record.offsets[col];
                    if offset == TAG_OFFSET {
                        continue;
                    }
                    let size = record.sizes[col] as usize;
                    let from = offset as usize + size * src_row as usize;
                    let to = offset as usize + size * start as usize;
                    bytes.copy_within(from..from + size * hole as usize, to);
                }

                // The relocated entities live at the hole now; read their
                // handles back to fix up the slot table.
                let entity_offset = record.offsets[0] as usize;
                for row in start..start + hole {
                    let at = entity_offset + 8 * row as usize;
                    let bits = u64::from_le_bytes(bytes[at..at + 8].try_into().expect("8 bytes"));
                    moved.push(Entity::from_bits(bits));
                }
            }

            block.entity_count -= span;
            moved
        };

        for (i, entity) in moved.iter().enumerate() {
            self.data_slots[entity.index() as usize] =
                EntityDataSlot::new(instance, block_index, start + i as u32);
        }
    }
}

impl Default for EntityStorage {
    fn default() -> Self {
        EntityStorage::new()
    }
}
