//! Process-wide buffer pool (spec §4.1)
//!
//! Generalizes the teacher's `util::buffer::BufferPool` — a pool of
//! fixed-size, pre-allocated slots handed out by index — into a slab
//! allocator over *variable*-sized requests, because the flush controller's
//! `maxfree` heuristic needs a tight bound across payloads that are never
//! the same size twice (WMB entries and iobufs scale with `arraylen`/
//! `maxiobuflen`, not a fixed block size).
//!
//! Two variants are selectable at construction (spec §4.1): [`SlabPool`], the
//! default integrated allocator, and [`MallocPool`], which delegates to the
//! system allocator and reports a looser `maxfree` bound. Both implement
//! [`Pool`], the same "one trait, swappable backends" shape as the teacher's
//! `engine::IOEngine`.

use crate::error::PioError;
use crate::Result;

/// A handle to an acquired block. Opaque to callers; `SlabPool` uses the
/// block's starting offset into its arena, `MallocPool` uses a monotonic id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

/// Live pool statistics (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Bytes currently allocated (handed out, not yet released).
    pub curalloc: usize,
    /// Total free bytes across all free regions.
    pub totfree: usize,
    /// Largest single contiguous free block. The flush controller's
    /// IO-flush heuristic depends on this being tight (spec §4.1, §9).
    pub maxfree: usize,
    /// Cumulative `acquire` calls.
    pub gets: u64,
    /// Cumulative `release` calls.
    pub releases: u64,
}

/// The buffer pool contract (spec §4.1). Process-wide, not per-file; shared
/// across all open files but touched only from the owning task's own thread
/// (spec §5), so no internal locking is required.
pub trait Pool {
    /// Returns a zero-filled contiguous block of at least `n` bytes, or
    /// `Err(PioError::Oom)`.
    fn acquire(&mut self, n: usize) -> Result<BlockId>;

    /// In-place realloc analogue. On failure the original block is
    /// untouched and still valid (spec §4.1).
    fn grow(&mut self, id: BlockId, n: usize) -> Result<()>;

    /// Returns the block to the pool. Double-release is a bug, not a
    /// recoverable condition (spec §4.1) — implementations panic.
    fn release(&mut self, id: BlockId);

    /// Borrow a previously acquired block's bytes.
    fn block(&self, id: BlockId) -> &[u8];

    /// Mutably borrow a previously acquired block's bytes.
    fn block_mut(&mut self, id: BlockId) -> &mut [u8];

    /// Current statistics.
    fn stats(&self) -> PoolStats;
}

#[derive(Debug, Clone, Copy)]
struct Region {
    offset: usize,
    size: usize,
    free: bool,
}

/// Integrated slab allocator over one fixed-capacity arena (spec §4.1
/// default variant).
pub struct SlabPool {
    arena: Vec<u8>,
    /// Regions sorted by `offset`, covering `arena` exactly with no gaps.
    regions: Vec<Region>,
    curalloc: usize,
    gets: u64,
    releases: u64,
}

impl SlabPool {
    /// Creates a slab pool backed by `capacity` bytes of arena.
    pub fn new(capacity: usize) -> Self {
        SlabPool {
            arena: vec![0u8; capacity],
            regions: vec![Region { offset: 0, size: capacity, free: true }],
            curalloc: 0,
            gets: 0,
            releases: 0,
        }
    }

    fn region_index(&self, offset: usize) -> Option<usize> {
        self.regions.iter().position(|r| r.offset == offset)
    }

    fn merge_free_neighbors(&mut self, idx: usize) {
        // Merge with the next region first so `idx` stays valid.
        if idx + 1 < self.regions.len() && self.regions[idx + 1].free {
            let next_size = self.regions[idx + 1].size;
            self.regions[idx].size += next_size;
            self.regions.remove(idx + 1);
        }
        if idx > 0 && self.regions[idx - 1].free {
            let cur = self.regions.remove(idx);
            self.regions[idx - 1].size += cur.size;
        }
    }
}

impl Pool for SlabPool {
    fn acquire(&mut self, n: usize) -> Result<BlockId> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.free && r.size >= n)
            .ok_or_else(|| PioError::Oom(format!("no free region of {n} bytes available")))?;

        let offset = self.regions[idx].offset;
        let region_size = self.regions[idx].size;

        self.regions[idx].free = false;
        self.regions[idx].size = n;

        if region_size > n {
            self.regions.insert(
                idx + 1,
                Region { offset: offset + n, size: region_size - n, free: true },
            );
        }

        self.arena[offset..offset + n].fill(0);
        self.curalloc += n;
        self.gets += 1;
        Ok(BlockId(offset))
    }

    fn grow(&mut self, id: BlockId, n: usize) -> Result<()> {
        let idx = self
            .region_index(id.0)
            .ok_or_else(|| PioError::Inval(format!("unknown block {}", id.0)))?;
        let old_size = self.regions[idx].size;
        if n <= old_size {
            return Ok(());
        }
        let needed = n - old_size;

        let has_room = idx + 1 < self.regions.len()
            && self.regions[idx + 1].free
            && self.regions[idx + 1].size >= needed;
        if !has_room {
            return Err(PioError::Oom(format!(
                "cannot grow block {} from {old_size} to {n} bytes in place",
                id.0
            )));
        }

        let next_size = self.regions[idx + 1].size;
        self.regions[idx].size = n;
        if next_size == needed {
            self.regions.remove(idx + 1);
        } else {
            self.regions[idx + 1].offset += needed;
            self.regions[idx + 1].size = next_size - needed;
        }

        let grown_start = id.0 + old_size;
        self.arena[grown_start..grown_start + needed].fill(0);
        self.curalloc += needed;
        Ok(())
    }

    fn release(&mut self, id: BlockId) {
        let idx = self.region_index(id.0).expect("release of unknown block");
        if self.regions[idx].free {
            panic!("double release of block {}", id.0);
        }
        self.curalloc -= self.regions[idx].size;
        self.regions[idx].free = true;
        self.releases += 1;
        self.merge_free_neighbors(idx);
    }

    fn block(&self, id: BlockId) -> &[u8] {
        let idx = self.region_index(id.0).expect("unknown block");
        let r = self.regions[idx];
        &self.arena[r.offset..r.offset + r.size]
    }

    fn block_mut(&mut self, id: BlockId) -> &mut [u8] {
        let idx = self.region_index(id.0).expect("unknown block");
        let r = self.regions[idx];
        &mut self.arena[r.offset..r.offset + r.size]
    }

    fn stats(&self) -> PoolStats {
        let totfree: usize = self.regions.iter().filter(|r| r.free).map(|r| r.size).sum();
        let maxfree = self.regions.iter().filter(|r| r.free).map(|r| r.size).max().unwrap_or(0);
        PoolStats { curalloc: self.curalloc, totfree, maxfree, gets: self.gets, releases: self.releases }
    }
}

/// Delegates to the system allocator (`PIO_USE_MALLOC`, spec §4.1). Does not
/// track fragmentation, so `maxfree` is reported as `totfree` — a looser
/// bound than `SlabPool`'s, in keeping with spec §9's note that a malloc
/// delegate "loses its ability to schedule I/O flushes preemptively" unless
/// it supplies *some* compatible stats call.
pub struct MallocPool {
    blocks: std::collections::HashMap<usize, Vec<u8>>,
    next_id: usize,
    capacity_hint: usize,
    curalloc: usize,
    gets: u64,
    releases: u64,
}

impl MallocPool {
    /// `capacity_hint` is only used to report `totfree`/`maxfree`; it does
    /// not bound actual allocation (the system allocator does that).
    pub fn new(capacity_hint: usize) -> Self {
        MallocPool {
            blocks: std::collections::HashMap::new(),
            next_id: 0,
            capacity_hint,
            curalloc: 0,
            gets: 0,
            releases: 0,
        }
    }
}

impl Pool for MallocPool {
    fn acquire(&mut self, n: usize) -> Result<BlockId> {
        let id = self.next_id;
        self.next_id += 1;
        self.blocks.insert(id, vec![0u8; n]);
        self.curalloc += n;
        self.gets += 1;
        Ok(BlockId(id))
    }

    fn grow(&mut self, id: BlockId, n: usize) -> Result<()> {
        let block = self.blocks.get_mut(&id.0).ok_or_else(|| PioError::Inval(format!("unknown block {}", id.0)))?;
        if n > block.len() {
            let added = n - block.len();
            block.resize(n, 0);
            self.curalloc += added;
        }
        Ok(())
    }

    fn release(&mut self, id: BlockId) {
        let block = self.blocks.remove(&id.0).expect("release of unknown block");
        self.curalloc -= block.len();
        self.releases += 1;
    }

    fn block(&self, id: BlockId) -> &[u8] {
        self.blocks.get(&id.0).expect("unknown block")
    }

    fn block_mut(&mut self, id: BlockId) -> &mut [u8] {
        self.blocks.get_mut(&id.0).expect("unknown block")
    }

    fn stats(&self) -> PoolStats {
        let totfree = self.capacity_hint.saturating_sub(self.curalloc);
        PoolStats { curalloc: self.curalloc, totfree, maxfree: totfree, gets: self.gets, releases: self.releases }
    }
}

/// Builds the configured pool variant (spec §4.1, `PIO_USE_MALLOC`).
pub fn new_pool(use_malloc: bool, capacity: usize) -> Box<dyn Pool + Send> {
    if use_malloc {
        Box::new(MallocPool::new(capacity))
    } else {
        Box::new(SlabPool::new(capacity))
    }
}
