//! Block allocator over a fixed-size arena.
//!
//! Models memory as a flat address space split into contiguous blocks, each
//! either `Free` or owned by a pid. Allocation can split a block;
//! deallocation always coalesces with both neighbors so no two adjacent
//! blocks are ever both free.

use crate::error::MeshError;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AllocStrategy {
    FirstFit,
    BestFit,
    WorstFit,
    NextFit,
}

impl std::str::FromStr for AllocStrategy {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first_fit" | "first-fit" | "first" => Ok(AllocStrategy::FirstFit),
            "best_fit" | "best-fit" | "best" => Ok(AllocStrategy::BestFit),
            "worst_fit" | "worst-fit" | "worst" => Ok(AllocStrategy::WorstFit),
            "next_fit" | "next-fit" | "next" => Ok(AllocStrategy::NextFit),
            other => Err(MeshError::BadRequest(format!("unknown allocation strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    offset: u64,
    size: u64,
    /// `Some(pid)` for an allocated block, `None` while free.
    owner: Option<u64>,
}

impl Block {
    fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct FragmentationReport {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
    pub free_block_count: usize,
    pub allocated_block_count: usize,
    pub largest_free_block: u64,
}

struct Inner {
    blocks: Vec<Block>,
    /// Index into `blocks` where the next-fit scan resumes.
    next_fit_cursor: usize,
}

pub struct BlockAllocator {
    total_bytes: u64,
    inner: Mutex<Inner>,
}

impl BlockAllocator {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            inner: Mutex::new(Inner {
                blocks: vec![Block { offset: 0, size: total_bytes, owner: None }],
                next_fit_cursor: 0,
            }),
        }
    }

    pub fn allocate(&self, pid: u64, size: u64, strategy: AllocStrategy) -> Result<u64, MeshError> {
        if size == 0 {
            return Err(MeshError::BadRequest("allocation size must be nonzero".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();

        let candidate = match strategy {
            AllocStrategy::FirstFit => {
                inner.blocks.iter().position(|b| b.is_free() && b.size >= size)
            }
            AllocStrategy::BestFit => inner
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| b.is_free() && b.size >= size)
                .min_by_key(|(_, b)| b.size)
                .map(|(i, _)| i),
            AllocStrategy::WorstFit => inner
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| b.is_free() && b.size >= size)
                .max_by_key(|(_, b)| b.size)
                .map(|(i, _)| i),
            AllocStrategy::NextFit => {
                let len = inner.blocks.len();
                let start = inner.next_fit_cursor.min(len.saturating_sub(1));
                (0..len)
                    .map(|i| (start + i) % len)
                    .find(|&i| inner.blocks[i].is_free() && inner.blocks[i].size >= size)
            }
        };

        let Some(index) = candidate else {
            return Err(MeshError::OutOfMemory);
        };

        let block = inner.blocks[index];
        let offset = block.offset;
        if block.size > size {
            inner.blocks[index] = Block { offset, size, owner: Some(pid) };
            inner.blocks.insert(
                index + 1,
                Block { offset: offset + size, size: block.size - size, owner: None },
            );
        } else {
            inner.blocks[index].owner = Some(pid);
        }
        inner.next_fit_cursor = index + 1;
        Ok(offset)
    }

    /// Frees the block at `offset`. `pid` must match the block's owner;
    /// mismatches are rejected rather than letting one process free
    /// another's allocation.
    pub fn free(&self, pid: u64, offset: u64) -> Result<(), MeshError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.blocks.iter().position(|b| b.offset == offset && !b.is_free())
        else {
            return Err(MeshError::BadRequest(format!("no allocated block at offset {offset}")));
        };
        if inner.blocks[index].owner != Some(pid) {
            return Err(MeshError::BadRequest(format!(
                "block at offset {offset} is not owned by pid {pid}"
            )));
        }
        inner.blocks[index].owner = None;
        self.coalesce(&mut inner, index);
        Ok(())
    }

    fn coalesce(&self, inner: &mut Inner, index: usize) {
        let mut index = index;
        if index + 1 < inner.blocks.len() && inner.blocks[index + 1].is_free() {
            let next = inner.blocks.remove(index + 1);
            inner.blocks[index].size += next.size;
        }
        if index > 0 && inner.blocks[index - 1].is_free() {
            let cur = inner.blocks.remove(index);
            inner.blocks[index - 1].size += cur.size;
            index -= 1;
        }
        inner.next_fit_cursor = index.min(inner.blocks.len().saturating_sub(1));
    }

    pub fn fragmentation(&self) -> FragmentationReport {
        let inner = self.inner.lock().unwrap();
        let mut free_bytes = 0u64;
        let mut allocated_bytes = 0u64;
        let mut free_block_count = 0usize;
        let mut allocated_block_count = 0usize;
        let mut largest_free_block = 0u64;
        for block in &inner.blocks {
            if block.is_free() {
                free_bytes += block.size;
                free_block_count += 1;
                largest_free_block = largest_free_block.max(block.size);
            } else {
                allocated_bytes += block.size;
                allocated_block_count += 1;
            }
        }
        FragmentationReport {
            total_bytes: self.total_bytes,
            free_bytes,
            allocated_bytes,
            free_block_count,
            allocated_block_count,
            largest_free_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_returns_to_a_single_free_block() {
        let alloc = BlockAllocator::new(1024);
        let offset = alloc.allocate(1, 100, AllocStrategy::FirstFit).unwrap();
        alloc.free(1, offset).unwrap();
        let report = alloc.fragmentation();
        assert_eq!(report.free_block_count, 1);
        assert_eq!(report.free_bytes, 1024);
    }

    #[test]
    fn out_of_memory_when_nothing_fits() {
        let alloc = BlockAllocator::new(100);
        assert!(alloc.allocate(1, 50, AllocStrategy::FirstFit).is_ok());
        assert!(matches!(alloc.allocate(1, 60, AllocStrategy::FirstFit), Err(MeshError::OutOfMemory)));
    }

    #[test]
    fn best_fit_picks_the_tightest_free_block() {
        let alloc = BlockAllocator::new(1000);
        // carve: [0,100) alloc, [100,1000) free
        let a = alloc.allocate(1, 100, AllocStrategy::FirstFit).unwrap();
        // carve another small block out of the remainder to create two free candidates
        let b = alloc.allocate(1, 50, AllocStrategy::FirstFit).unwrap();
        alloc.free(1, a).unwrap();
        // now: [0,100) free, [150, 200) alloc, [200,1000) free
        let picked = alloc.allocate(1, 80, AllocStrategy::BestFit).unwrap();
        assert_eq!(picked, 0);
        alloc.free(1, b).unwrap();
    }

    #[test]
    fn no_two_adjacent_free_blocks_survive_a_deallocate() {
        let alloc = BlockAllocator::new(300);
        let a = alloc.allocate(1, 100, AllocStrategy::FirstFit).unwrap();
        let b = alloc.allocate(1, 100, AllocStrategy::FirstFit).unwrap();
        let _c = alloc.allocate(1, 100, AllocStrategy::FirstFit).unwrap();
        alloc.free(1, a).unwrap();
        alloc.free(1, b).unwrap();
        let inner = alloc.inner.lock().unwrap();
        for pair in inner.blocks.windows(2) {
            assert!(!pair[0].is_free() || !pair[1].is_free());
        }
    }

    #[test]
    fn freeing_an_unknown_offset_is_an_error() {
        let alloc = BlockAllocator::new(100);
        assert!(alloc.free(1, 40).is_err());
    }

    #[test]
    fn freeing_another_pids_block_is_rejected() {
        let alloc = BlockAllocator::new(100);
        let offset = alloc.allocate(1, 50, AllocStrategy::FirstFit).unwrap();
        assert!(alloc.free(2, offset).is_err());
        assert!(alloc.free(1, offset).is_ok());
    }
}
