// block.rs - fixed-size storage blocks and the per-archetype pool
//
// A block stores entities of one archetype as struct-of-arrays: each
// component column is a contiguous array at the offset solved in the
// archetype record. Released blocks go back to the pool for reuse.

use std::sync::Arc;

use crate::memory::{AllocRequest, Allocator, Alignment, MemBlock};

/// Fixed allocation size of every storage block.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// One chunk of entity data. The column layout lives in the owning
/// archetype's record; all blocks of an archetype share it.
pub struct DataBlock {
    pub entity_count: u32,
    pub entity_count_max: u32,
    memory: MemBlock,
    allocator: Arc<dyn Allocator + Send + Sync>,
}

// The raw pointer inside `memory` is uniquely owned by this block.
unsafe impl Send for DataBlock {}
unsafe impl Sync for DataBlock {}

impl DataBlock {
    pub fn bytes(&self) -> &[u8] {
        // Safety: the block owns its memory until dropped.
        unsafe { self.memory.bytes() }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // Safety: unique ownership, `&mut self` guarantees exclusivity.
        unsafe { self.memory.bytes_mut() }
    }
}

impl Drop for DataBlock {
    fn drop(&mut self) {
        self.allocator.deallocate(self.memory);
    }
}

/// Free-list of storage blocks for one archetype.
pub struct BlockPool {
    allocator: Arc<dyn Allocator + Send + Sync>,
    free: Vec<DataBlock>,
}

impl BlockPool {
    pub fn new(allocator: Arc<dyn Allocator + Send + Sync>) -> BlockPool {
        BlockPool {
            allocator,
            free: Vec::new(),
        }
    }

    /// Hand out a reusable or freshly allocated block.
    pub fn request(&mut self, entity_count_max: u32) -> DataBlock {
        if let Some(mut block) = self.free.pop() {
            block.entity_count = 0;
            block.entity_count_max = entity_count_max;
            return block;
        }

        let mut memory = self
            .allocator
            .allocate(AllocRequest::new(BLOCK_SIZE, Alignment::B64))
            .expect("storage block allocation failed");

        // Fresh blocks start zeroed so padding and untouched columns never
        // expose uninitialized bytes.
        unsafe { memory.bytes_mut().fill(0) };

        DataBlock {
            entity_count: 0,
            entity_count_max,
            memory,
            allocator: Arc::clone(&self.allocator),
        }
    }

    pub fn release(&mut self, mut block: DataBlock) {
        block.entity_count = 0;
        self.free.push(block);
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostAllocator;

    fn pool() -> BlockPool {
        BlockPool::new(Arc::new(HostAllocator))
    }

    #[test]
    fn test_blocks_are_zeroed_on_first_use() {
        let mut pool = pool();
        let block = pool.request(128);
        assert_eq!(block.bytes().len(), BLOCK_SIZE);
        assert!(block.bytes().iter().all(|&b| b == 0));
        pool.release(block);
    }

    #[test]
    fn test_pool_reuses_released_blocks() {
        let mut pool = pool();
        let mut block = pool.request(64);
        block.bytes_mut()[0] = 0xFF;
        let ptr = block.bytes().as_ptr();
        pool.release(block);
        assert_eq!(pool.free_count(), 1);

        let again = pool.request(32);
        assert_eq!(again.bytes().as_ptr(), ptr);
        assert_eq!(again.entity_count, 0);
        assert_eq!(again.entity_count_max, 32);
        pool.release(again);
    }
}
