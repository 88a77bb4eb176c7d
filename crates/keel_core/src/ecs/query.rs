// query.rs - block views for iteration, guarded by access trackers
//
// A query declares the components it reads and writes. Taking a view bumps
// `stage_next` on every declared component's tracker; retiring the view
// bumps `stage_executed`. The storage executor refuses to run while the two
// disagree, which is exactly "no structural mutation while a query
// iterates".

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::archetype::{ArchetypeRecord, TAG_OFFSET};
use super::block::DataBlock;
use super::component::{Component, ComponentId};
use super::entity::Entity;
use super::storage::{EntityStorage, QueryAccessTracker};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    pub component: ComponentId,
    pub write: bool,
}

/// Declared component access set of one query.
#[derive(Clone, Default)]
pub struct Query {
    terms: Vec<QueryTerm>,
}

impl Query {
    pub fn new() -> Query {
        Query::default()
    }

    pub fn read<T: Component>(self) -> Query {
        self.read_id(T::id())
    }

    pub fn write<T: Component>(self) -> Query {
        self.write_id(T::id())
    }

    pub fn read_id(mut self, component: ComponentId) -> Query {
        self.terms.push(QueryTerm {
            component,
            write: false,
        });
        self
    }

    pub fn write_id(mut self, component: ComponentId) -> Query {
        self.terms.push(QueryTerm {
            component,
            write: true,
        });
        self
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }
}

impl EntityStorage {
    /// Take a read view over every archetype containing all query terms.
    /// The view holds the access trackers until dropped.
    pub fn query<'a>(&'a self, query: &Query) -> QueryView<'a> {
        let mut trackers = Vec::with_capacity(query.terms().len());
        for term in query.terms() {
            let tracker = self
                .tracker(term.component)
                .expect("query term is not part of any registered archetype");
            tracker.stage_next.fetch_add(1, Ordering::Relaxed);
            trackers.push(Arc::clone(tracker));
        }

        let matches = self.matching_instances(query);
        QueryView {
            storage: self,
            trackers,
            matches,
        }
    }

    /// Run `f` over every matching block with mutable access. Tracker entry
    /// and exit wrap the whole sweep.
    pub fn for_each_block_mut(&mut self, query: &Query, mut f: impl FnMut(BlockViewMut<'_>)) {
        let trackers: Vec<Arc<QueryAccessTracker>> = query
            .terms()
            .iter()
            .map(|term| {
                Arc::clone(
                    self.tracker(term.component)
                        .expect("query term is not part of any registered archetype"),
                )
            })
            .collect();
        for tracker in &trackers {
            tracker.stage_next.fetch_add(1, Ordering::Relaxed);
        }

        for instance in self.matching_instances(query) {
            let record = self.record(instance);
            for block in self.blocks_of_mut(instance) {
                if block.entity_count == 0 {
                    continue;
                }
                f(BlockViewMut {
                    record: record.as_ref(),
                    block,
                });
            }
        }

        for tracker in &trackers {
            tracker.stage_executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn matching_instances(&self, query: &Query) -> Vec<u32> {
        (1..self.archetype_count() as u32)
            .filter(|&instance| {
                let record = self.record(instance);
                query
                    .terms()
                    .iter()
                    .all(|term| record.contains(term.component))
            })
            .collect()
    }
}

/// Read view over the blocks matched by a query.
pub struct QueryView<'a> {
    storage: &'a EntityStorage,
    trackers: Vec<Arc<QueryAccessTracker>>,
    matches: Vec<u32>,
}

impl<'a> QueryView<'a> {
    pub fn matched_archetypes(&self) -> usize {
        self.matches.len()
    }

    pub fn for_each_block(&self, mut f: impl FnMut(BlockView<'_>)) {
        for &instance in &self.matches {
            let record = self.storage.record(instance);
            for block in self.storage.blocks_of(instance) {
                if block.entity_count == 0 {
                    continue;
                }
                f(BlockView {
                    record: record.as_ref(),
                    block,
                });
            }
        }
    }

    pub fn entity_count(&self) -> usize {
        let mut total = 0;
        self.for_each_block(|block| total += block.len());
        total
    }
}

impl Drop for QueryView<'_> {
    fn drop(&mut self) {
        for tracker in &self.trackers {
            tracker.stage_executed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Immutable column access into one block.
pub struct BlockView<'a> {
    record: &'a ArchetypeRecord,
    block: &'a DataBlock,
}

impl<'a> BlockView<'a> {
    pub fn len(&self) -> usize {
        self.block.entity_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entities(&self) -> &'a [Entity] {
        let offset = self.record.offsets[0] as usize;
        bytemuck::cast_slice(&self.block.bytes()[offset..offset + 8 * self.len()])
    }

    pub fn column_bytes(&self, component: ComponentId) -> Option<&'a [u8]> {
        let col = self.record.column_of(component)?;
        let offset = self.record.offsets[col];
        if offset == TAG_OFFSET {
            return None;
        }
        let size = self.record.sizes[col] as usize;
        Some(&self.block.bytes()[offset as usize..offset as usize + size * self.len()])
    }

    pub fn column<T: Component>(&self) -> Option<&'a [T]> {
        Some(bytemuck::cast_slice(self.column_bytes(T::id())?))
    }
}

/// Mutable column access into one block.
pub struct BlockViewMut<'a> {
    record: &'a ArchetypeRecord,
    block: &'a mut DataBlock,
}

impl BlockViewMut<'_> {
    pub fn len(&self) -> usize {
        self.block.entity_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entities(&self) -> Vec<Entity> {
        let offset = self.record.offsets[0] as usize;
        bytemuck::cast_slice(&self.block.bytes()[offset..offset + 8 * self.len()]).to_vec()
    }

    fn column_range(&self, component: ComponentId, expected_size: usize) -> Option<(usize, usize)> {
        let col = self.record.column_of(component)?;
        let offset = self.record.offsets[col];
        if offset == TAG_OFFSET {
            return None;
        }
        let size = self.record.sizes[col] as usize;
        debug_assert_eq!(size, expected_size, "component size mismatch");
        Some((offset as usize, size * self.len()))
    }

    pub fn column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        let (offset, len) = self.column_range(T::id(), std::mem::size_of::<T>())?;
        let bytes = self.block.bytes_mut();
        Some(bytemuck::cast_slice_mut(&mut bytes[offset..offset + len]))
    }

    /// Two distinct columns at once, e.g. integrate positions from
    /// velocities.
    pub fn columns_mut<T: Component, U: Component>(&mut self) -> Option<(&mut [T], &mut [U])> {
        assert_ne!(T::id(), U::id(), "columns_mut requires two distinct components");
        let (t_offset, t_len) = self.column_range(T::id(), std::mem::size_of::<T>())?;
        let (u_offset, u_len) = self.column_range(U::id(), std::mem::size_of::<U>())?;

        let bytes = self.block.bytes_mut();
        let ptr = bytes.as_mut_ptr();

        // Safety: distinct components occupy disjoint column ranges within
        // the block, both in bounds of `bytes`.
        unsafe {
            let t = std::slice::from_raw_parts_mut(ptr.add(t_offset), t_len);
            let u = std::slice::from_raw_parts_mut(ptr.add(u_offset), u_len);
            Some((bytemuck::cast_slice_mut(t), bytemuck::cast_slice_mut(u)))
        }
    }
}
