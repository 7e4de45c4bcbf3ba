//! Write-multi-buffer: the compute-side aggregation cache (spec §3, §4.4)
//!
//! Per-file, per-`(ioid, recordvar)` queue of variable payloads awaiting
//! rearrangement and write. Conceptually a mapping `(ioid, recordvar) →
//! WMB`; spec §9 notes "a two-node chain suffices in practice because the
//! number of distinct decompositions per file is tiny" and explicitly allows
//! substituting a small associative container — this crate uses a `Vec`
//! (linear scan, never more than a handful of entries) rather than the
//! teacher's `HashMap`-heavy style elsewhere, matching that note.
//!
//! `data` is grown in-place through the process-wide [`Pool`] (spec §4.4:
//! "`append` grows the parallel `data` ... arrays in-place using `grow`"),
//! which is also why the flush controller's pool-stats heuristic (spec §4.5)
//! is meaningful at all: every queued byte is reflected in `curalloc`. The
//! smaller per-array metadata (`vid`, `frame`, `fillvalue`) stays a plain
//! `Vec` — negligible next to payload data, and pool-backing it would only
//! add bookkeeping without changing any observable flush behavior.

use crate::buffer_pool::{BlockId, Pool};
use crate::error::PioError;
use crate::Result;

/// Uniquely identifies a WMB within a file: the decomposition id plus
/// whether its variables are record variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WmbKey {
    pub ioid: i32,
    pub recordvar: bool,
}

/// One queued payload inside a WMB.
#[derive(Debug, Clone)]
struct QueuedArray {
    vid: i32,
    frame: Option<i32>,
    fillvalue: Vec<u8>,
}

/// The per-`(ioid, recordvar)` aggregation cache (spec §3).
///
/// Invariants (W1-W3 in spec §3):
/// - every payload shares the same decomposition, element size, and
///   `recordvar` flag (enforced by construction: one `Wmb` per key);
/// - `data` grows only by exact multiples of `arraylen * mpitype_size`
///   (enforced by `append`, the only mutator, via `Pool::grow`);
/// - contents are never observed by I/O tasks before a flush (enforced by
///   callers: nothing in this module performs I/O).
pub struct Wmb {
    pub key: WmbKey,
    /// Element count shared by every queued payload (spec §3).
    pub arraylen: usize,
    pub mpitype_size: usize,
    queued: Vec<QueuedArray>,
    block: Option<BlockId>,
}

impl Wmb {
    pub fn new(key: WmbKey, arraylen: usize, mpitype_size: usize) -> Self {
        Wmb { key, arraylen, mpitype_size, queued: Vec::new(), block: None }
    }

    /// How many payloads are currently queued (`num_arrays` in spec §3).
    pub fn num_arrays(&self) -> usize {
        self.queued.len()
    }

    /// Total queued payload bytes (`num_arrays * arraylen * mpitype_size`).
    pub fn data_len(&self) -> usize {
        self.queued.len() * self.arraylen * self.mpitype_size
    }

    pub fn vids(&self) -> Vec<i32> {
        self.queued.iter().map(|q| q.vid).collect()
    }

    pub fn frames(&self) -> Vec<Option<i32>> {
        self.queued.iter().map(|q| q.frame).collect()
    }

    pub fn fillvalues(&self) -> Vec<Vec<u8>> {
        self.queued.iter().map(|q| q.fillvalue.clone()).collect()
    }

    /// Borrows the queued payload bytes out of the pool. Empty (not an
    /// error) when nothing has been queued yet.
    pub fn data<'p>(&self, pool: &'p dyn Pool) -> &'p [u8] {
        match self.block {
            Some(id) => pool.block(id),
            None => &[],
        }
    }

    /// Appends one payload, growing the pool-backed `data` block by exactly
    /// `arraylen * mpitype_size` bytes (spec §4.4). Preconditions
    /// (enforced by the orchestrator before calling this, spec §4.4) are
    /// re-checked here defensively: `payload` must be exactly
    /// `arraylen * mpitype_size` bytes, and frame presence must be
    /// consistent across the WMB.
    pub fn append(
        &mut self,
        pool: &mut dyn Pool,
        vid: i32,
        payload: &[u8],
        fillvalue: Option<&[u8]>,
        frame: Option<i32>,
    ) -> Result<()> {
        let expected = self.arraylen * self.mpitype_size;
        if payload.len() != expected {
            return Err(PioError::Inval(format!(
                "payload length {} does not match arraylen*mpitype_size {expected}",
                payload.len()
            )));
        }
        if frame.is_some() != self.has_record_frames() && self.num_arrays() > 0 {
            return Err(PioError::Inval("frame presence must be consistent across a WMB".into()));
        }

        let old_len = self.data_len();
        let new_len = old_len + payload.len();
        match self.block {
            None => {
                let id = pool.acquire(new_len)?;
                pool.block_mut(id)[old_len..new_len].copy_from_slice(payload);
                self.block = Some(id);
            }
            Some(id) => {
                pool.grow(id, new_len)?;
                pool.block_mut(id)[old_len..new_len].copy_from_slice(payload);
            }
        }

        self.queued.push(QueuedArray {
            vid,
            frame,
            fillvalue: fillvalue.map(|f| f.to_vec()).unwrap_or_default(),
        });
        Ok(())
    }

    fn has_record_frames(&self) -> bool {
        self.queued.first().map(|q| q.frame.is_some()).unwrap_or(false)
    }

    /// Resets the WMB after a flush (spec §8, Testable Property 3: "after a
    /// flush ... `num_arrays` of the involved WMB resets to 0"), releasing
    /// the pool-backed `data` block.
    pub fn reset(&mut self, pool: &mut dyn Pool) {
        if let Some(id) = self.block.take() {
            pool.release(id);
        }
        self.queued.clear();
    }
}

/// The per-file chain of WMBs, one per distinct `(ioid, recordvar)` pair.
#[derive(Default)]
pub struct WmbChain {
    entries: Vec<Wmb>,
}

impl WmbChain {
    pub fn new() -> Self {
        WmbChain { entries: Vec::new() }
    }

    pub fn lookup(&self, key: WmbKey) -> Option<&Wmb> {
        self.entries.iter().find(|w| w.key == key)
    }

    pub fn lookup_mut(&mut self, key: WmbKey) -> Option<&mut Wmb> {
        self.entries.iter_mut().find(|w| w.key == key)
    }

    pub fn create(&mut self, key: WmbKey, arraylen: usize, mpitype_size: usize) -> &mut Wmb {
        self.entries.push(Wmb::new(key, arraylen, mpitype_size));
        self.entries.last_mut().unwrap()
    }

    /// Lazily fetches the WMB for `key`, creating it on first use (spec §3
    /// lifecycle: "WMBs are created lazily on first append").
    pub fn get_or_create(&mut self, key: WmbKey, arraylen: usize, mpitype_size: usize) -> &mut Wmb {
        if self.lookup(key).is_none() {
            self.create(key, arraylen, mpitype_size);
        }
        self.lookup_mut(key).unwrap()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wmb> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::SlabPool;

    fn key() -> WmbKey {
        WmbKey { ioid: 1, recordvar: false }
    }

    #[test]
    fn append_grows_pool_backed_data_by_exact_multiples_of_arraylen() {
        let mut pool = SlabPool::new(1024);
        let mut wmb = Wmb::new(key(), 4, 8);
        wmb.append(&mut pool, 10, &[1u8; 32], None, None).unwrap();
        assert_eq!(wmb.data_len(), 32);
        assert_eq!(pool.stats().curalloc, 32);
        wmb.append(&mut pool, 11, &[2u8; 32], None, None).unwrap();
        assert_eq!(wmb.data_len(), 64);
        assert_eq!(pool.stats().curalloc, 64);
        assert_eq!(wmb.num_arrays(), 2);
        assert_eq!(&wmb.data(&pool)[0..32], &[1u8; 32][..]);
        assert_eq!(&wmb.data(&pool)[32..64], &[2u8; 32][..]);
    }

    #[test]
    fn append_rejects_mismatched_payload_length() {
        let mut pool = SlabPool::new(1024);
        let mut wmb = Wmb::new(key(), 4, 8);
        assert!(wmb.append(&mut pool, 10, &[0u8; 16], None, None).is_err());
    }

    #[test]
    fn reset_clears_queued_arrays_and_releases_pool_block() {
        let mut pool = SlabPool::new(1024);
        let mut wmb = Wmb::new(key(), 4, 8);
        wmb.append(&mut pool, 10, &[0u8; 32], None, None).unwrap();
        wmb.reset(&mut pool);
        assert_eq!(wmb.num_arrays(), 0);
        assert_eq!(wmb.data_len(), 0);
        assert_eq!(pool.stats().curalloc, 0);
    }

    #[test]
    fn chain_creates_lazily_and_reuses_existing_entry() {
        let mut pool = SlabPool::new(1024);
        let mut chain = WmbChain::new();
        assert!(chain.lookup(key()).is_none());
        chain.get_or_create(key(), 4, 8).append(&mut pool, 1, &[0u8; 32], None, None).unwrap();
        assert_eq!(chain.lookup(key()).unwrap().num_arrays(), 1);
        chain.get_or_create(key(), 4, 8).append(&mut pool, 2, &[0u8; 32], None, None).unwrap();
        assert_eq!(chain.lookup(key()).unwrap().num_arrays(), 2);
    }
}
