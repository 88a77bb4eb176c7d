// entity.rs - entity handles and the freelist-backed index allocator
//
// An entity is a 64-bit handle packing a slot index and a generation. The
// generation is bumped every time a slot is reused, so stale handles can be
// told apart from live ones.

use bytemuck::{Pod, Zeroable};

/// Entity handle: `{ index: u32 (low), generation: u32 (high) }`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    pub const NULL: Entity = Entity(0);

    pub fn new(index: u32, generation: u32) -> Entity {
        Entity((generation as u64) << 32 | index as u64)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Entity {
        Entity(bits)
    }
}

/// Freelist-backed allocator of entity indices.
pub struct EntityIndex {
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl EntityIndex {
    pub fn with_capacity(capacity: usize) -> EntityIndex {
        EntityIndex {
            generations: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Number of index slots ever handed out (live or reusable).
    pub fn count(&self) -> usize {
        self.generations.len()
    }

    pub fn create(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            return Entity::new(index, self.generations[index as usize]);
        }

        let index = self.generations.len() as u32;
        // Generation 1 keeps freshly created handles distinct from NULL.
        self.generations.push(1);
        Entity::new(index, 1)
    }

    pub fn create_many(&mut self, count: usize) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(self.create());
        }
        entities
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        index < self.generations.len() && self.generations[index] == entity.generation()
    }

    /// Returns false for handles that are already stale.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        if index >= self.generations.len() || self.generations[index] != entity.generation() {
            return false;
        }

        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free.push(entity.index());
        true
    }
}

impl Default for EntityIndex {
    fn default() -> Self {
        EntityIndex::with_capacity(1024)
    }
}
