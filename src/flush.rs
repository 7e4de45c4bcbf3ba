//! Flush controller (spec §4.5)
//!
//! Decides, after every intended `append` and before the WMB is mutated,
//! whether the write path must drain: in place (`NoFlush`), via an I/O flush
//! (rearrange and start the backend write, freeing the compute cache), or via
//! a disk flush (rearrange and finish the backend write, freeing the I/O
//! cache too). The decision is then synchronized across the compute
//! communicator with an all-reduce-MAX — the "Collective-agreement hazard"
//! design note is load-bearing: skipping it deadlocks the first collective in
//! the downstream rearrangement.

use crate::buffer_pool::PoolStats;
use crate::comm::Communicator;
use crate::decomp::Decomposition;
use crate::wmb::Wmb;
use crate::Result;

/// The 1.1x slack constant in the IO-flush trigger. Left unexplained in the
/// source this crate is grounded on (spec §9 Open Questions); preserved
/// verbatim rather than "fixed".
const IO_FLUSH_SLACK: f64 = 1.1;

/// Flush decision codes (spec §4.5 table). `NoFlush == 0`, `IoFlush == 1`,
/// `DiskFlush == 2` — ordering matters, since the all-reduce-MAX
/// synchronization relies on larger values taking precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum FlushCode {
    NoFlush = 0,
    IoFlush = 1,
    DiskFlush = 2,
}

impl FlushCode {
    fn from_i32(v: i32) -> FlushCode {
        match v {
            2 => FlushCode::DiskFlush,
            1 => FlushCode::IoFlush,
            _ => FlushCode::NoFlush,
        }
    }
}

/// Local (pre-collective) flush decision (spec §4.5).
///
/// `arraylen`/`mpitype_size` describe the payload about to be appended;
/// `pool_stats` is the buffer pool's current state; `wmb` is the target
/// WMB (its `num_arrays` feeds both triggers); `iodesc` supplies
/// `maxregions`/`maxfillregions` for the region-cap trigger;
/// `buffer_size_limit`/`max_cached_io_regions` are the two process-wide
/// tunables (spec §6, §4.5).
pub fn local_decision(
    wmb: &Wmb,
    arraylen: usize,
    mpitype_size: usize,
    iodesc: &Decomposition,
    pool_stats: &PoolStats,
    buffer_size_limit: usize,
    max_cached_io_regions: usize,
) -> FlushCode {
    let num_arrays = wmb.num_arrays();

    let projected_regions = (1 + num_arrays) * iodesc.max_regions();
    if projected_regions > max_cached_io_regions {
        return FlushCode::DiskFlush;
    }

    if pool_stats.curalloc >= buffer_size_limit {
        return FlushCode::DiskFlush;
    }

    let io_flush_threshold = IO_FLUSH_SLACK * (1 + num_arrays) as f64 * arraylen as f64 * mpitype_size as f64;
    if (pool_stats.maxfree as f64) <= io_flush_threshold {
        return FlushCode::IoFlush;
    }

    FlushCode::NoFlush
}

/// Synchronizes a locally-decided flush code across the compute communicator
/// via all-reduce-MAX (spec §4.5): "so that all compute tasks flush
/// together — a hard requirement for the downstream collective
/// rearrangement."
pub fn synchronize_decision(comm: &dyn Communicator, local: FlushCode) -> Result<FlushCode> {
    let agreed = comm.all_reduce_max(local as i32)?;
    Ok(FlushCode::from_i32(agreed))
}
