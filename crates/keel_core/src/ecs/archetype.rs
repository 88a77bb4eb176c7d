// archetype.rs - archetype identity and the instance registry
//
// An archetype is a sorted, deduplicated set of component identifiers. Its
// id is derived by mixing a fixed seed with each component hash in sorted
// order, so registration order never matters. Every registered archetype
// gets an instance record holding the solved block layout.

use std::collections::HashMap;
use std::sync::Arc;

use super::block::BLOCK_SIZE;
use super::component::{meta_of, ComponentId, ENTITY_COMPONENT};

/// Stable archetype identifier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Archetype(pub u64);

/// Column offset used by tag components (no storage).
pub const TAG_OFFSET: u32 = u32::MAX;

/// Hash of the archetype with no components, mixed with each member.
const EMPTY_ARCHETYPE_HASH: u64 = 0x9e37_79b9_7f4a_7c15;

fn hash_mix(mut left: u64, right: u64) -> u64 {
    left ^= left >> 33;
    left ^= right;
    left = left.wrapping_mul(0xff51_afd7_ed55_8ccd);
    left ^= left >> 33;
    left ^= right;
    left = left.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    left ^= left >> 33;
    left
}

/// Identifier over an already sorted component list.
pub fn archetype_identifier(sorted_components: &[ComponentId]) -> Archetype {
    let mut hash = EMPTY_ARCHETYPE_HASH;
    for &component in sorted_components {
        hash = hash_mix(hash, component);
    }
    Archetype(hash)
}

/// Layout record of a registered archetype instance.
///
/// `components[0]` is always the entity handle column; the rest follow in
/// sorted id order. All blocks of one archetype share this layout.
#[derive(Debug)]
pub struct ArchetypeRecord {
    pub archetype: Archetype,
    pub instance: u32,
    pub components: Vec<ComponentId>,
    pub sizes: Vec<u32>,
    pub aligns: Vec<u32>,
    /// Byte offset of each column inside a block; `TAG_OFFSET` for tags.
    pub offsets: Vec<u32>,
    pub entity_count_max: u32,
}

impl ArchetypeRecord {
    pub fn column_of(&self, component: ComponentId) -> Option<usize> {
        self.components.iter().position(|&c| c == component)
    }

    pub fn contains(&self, component: ComponentId) -> bool {
        self.column_of(component).is_some()
    }
}

/// Registry of archetype instances. Instance 0 is reserved and means
/// "entity has no archetype yet".
pub struct ArchetypeIndex {
    records: Vec<Arc<ArchetypeRecord>>,
    by_id: HashMap<u64, u32>,
}

impl ArchetypeIndex {
    pub fn new() -> ArchetypeIndex {
        let reserved = Arc::new(ArchetypeRecord {
            archetype: Archetype(0),
            instance: 0,
            components: Vec::new(),
            sizes: Vec::new(),
            aligns: Vec::new(),
            offsets: Vec::new(),
            entity_count_max: 0,
        });
        ArchetypeIndex {
            records: vec![reserved],
            by_id: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() <= 1
    }

    /// Register an archetype over the given components. Registering the same
    /// logical set twice returns the existing record.
    pub fn register(&mut self, components: &[ComponentId]) -> (Archetype, bool) {
        let mut sorted: Vec<ComponentId> = components
            .iter()
            .copied()
            .filter(|&c| c != ENTITY_COMPONENT)
            .collect();
        sorted.sort_unstable();
        sorted.dedup();

        let archetype = archetype_identifier(&sorted);
        if let Some(&instance) = self.by_id.get(&archetype.0) {
            debug_assert_eq!(self.records[instance as usize].archetype, archetype);
            return (archetype, false);
        }

        let mut all = Vec::with_capacity(sorted.len() + 1);
        all.push(ENTITY_COMPONENT);
        all.extend_from_slice(&sorted);

        let mut sizes = Vec::with_capacity(all.len());
        let mut aligns = Vec::with_capacity(all.len());
        for &component in &all {
            let meta = meta_of(component)
                .unwrap_or_else(|| panic!("component {component:#x} not registered"));
            sizes.push(meta.size);
            aligns.push(meta.align);
        }

        let (offsets, entity_count_max) = solve_block_layout(&sizes, &aligns);

        let instance = self.records.len() as u32;
        self.records.push(Arc::new(ArchetypeRecord {
            archetype,
            instance,
            components: all,
            sizes,
            aligns,
            offsets,
            entity_count_max,
        }));
        self.by_id.insert(archetype.0, instance);
        (archetype, true)
    }

    pub fn instance_of(&self, archetype: Archetype) -> Option<u32> {
        self.by_id.get(&archetype.0).copied()
    }

    pub fn record(&self, instance: u32) -> &Arc<ArchetypeRecord> {
        &self.records[instance as usize]
    }

    pub fn record_of(&self, archetype: Archetype) -> Option<&Arc<ArchetypeRecord>> {
        self.instance_of(archetype)
            .map(|instance| self.record(instance))
    }
}

impl Default for ArchetypeIndex {
    fn default() -> Self {
        ArchetypeIndex::new()
    }
}

/// Fit as many entities as possible into one block and lay the component
/// columns out one after another, each aligned to its requirement.
fn solve_block_layout(sizes: &[u32], aligns: &[u32]) -> (Vec<u32>, u32) {
    let row_size: u32 = sizes.iter().sum();
    let align_slack: u32 = aligns.iter().map(|&a| a.saturating_sub(1)).sum();

    let available = (BLOCK_SIZE as u32).saturating_sub(align_slack);
    let count = available / row_size.max(1);
    assert!(count > 0, "archetype row does not fit a storage block");

    let mut offsets = Vec::with_capacity(sizes.len());
    let mut offset: u32 = 0;
    for (&size, &align) in sizes.iter().zip(aligns) {
        if size == 0 {
            offsets.push(TAG_OFFSET);
            continue;
        }
        offset = offset.next_multiple_of(align.max(1));
        offsets.push(offset);
        offset += size * count;
    }

    debug_assert!(offset as usize <= BLOCK_SIZE);
    (offsets, count)
}

#[cfg(test)]
mod tests {
    use super::super::component::{register_component, register_tag};
    use super::*;

    #[test]
    fn test_identifier_is_order_independent() {
        let a = register_component("arch.test_a", 4, 4);
        let b = register_component("arch.test_b", 8, 8);
        let c = register_component("arch.test_c", 2, 2);

        let mut index = ArchetypeIndex::new();
        let (first, created) = index.register(&[a, b, c]);
        assert!(created);
        let (second, created) = index.register(&[c, a, b, a]);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_entity_column_is_first() {
        let a = register_component("arch.first_col", 4, 4);
        let mut index = ArchetypeIndex::new();
        let (archetype, _) = index.register(&[a]);

        let record = index.record_of(archetype).unwrap();
        assert_eq!(record.components[0], ENTITY_COMPONENT);
        assert_eq!(record.offsets[0], 0);
        assert!(record.entity_count_max > 0);
    }

    #[test]
    fn test_tag_components_take_no_space() {
        let data = register_component("arch.with_data", 16, 8);
        let tag = register_tag("arch.only_tag");

        let mut index = ArchetypeIndex::new();
        let (archetype, _) = index.register(&[data, tag]);
        let record = index.record_of(archetype).unwrap();

        let tag_column = record.column_of(tag).unwrap();
        assert_eq!(record.offsets[tag_column], TAG_OFFSET);

        // Tag membership still distinguishes archetypes.
        let (without_tag, _) = index.register(&[data]);
        assert_ne!(archetype, without_tag);
    }

    #[test]
    fn test_block_layout_fits() {
        let big = register_component("arch.big", 64, 8);
        let small = register_component("arch.small", 1, 1);

        let mut index = ArchetypeIndex::new();
        let (archetype, _) = index.register(&[big, small]);
        let record = index.record_of(archetype).unwrap();

        let count = record.entity_count_max;
        let mut end = 0u32;
        for (i, &offset) in record.offsets.iter().enumerate() {
            if offset == TAG_OFFSET {
                continue;
            }
            assert_eq!(offset as usize % record.aligns[i].max(1) as usize, 0);
            end = end.max(offset + record.sizes[i] * count);
        }
        assert!(end as usize <= BLOCK_SIZE);
    }
}
