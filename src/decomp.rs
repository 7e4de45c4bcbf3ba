//! Decomposition data model (spec §3)
//!
//! A `Decomposition` is consumed as an opaque descriptor; how the
//! compute→IO mapping is computed is out of scope (spec §1).

use crate::error::PioError;
use crate::Result;

/// `rearranger ∈ {BOX, SUBSET}` — immutable after construction (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearrangerKind {
    /// Every destination slot is covered by exactly one source contribution.
    Box,
    /// Some destination slots may have no contribution (a holegrid).
    Subset,
}

/// Describes the mapping from a compute task's local tile to the global
/// array indices handled by I/O tasks (spec §3, "Decomposition (io_desc)").
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub rearranger: RearrangerKind,
    /// Number of elements local to this compute task.
    pub ndof: usize,
    /// Number of elements local to this I/O task (destination side).
    pub llen: usize,
    /// Maximum `llen` across all I/O tasks.
    pub maxiobuflen: usize,
    /// Element size in bytes in transport.
    pub mpitype_size: usize,
    /// Element size in bytes in storage.
    pub piotype_size: usize,
    /// Max contiguous runs an I/O task must issue for data.
    pub maxregions: usize,
    /// Max contiguous runs an I/O task must issue for fill.
    pub maxfillregions: usize,
    /// Hole elements per I/O task (SUBSET only; 0 for BOX).
    pub holegridsize: usize,
    /// Hole elements across all I/O tasks (SUBSET only; 0 for BOX).
    pub maxholegridsize: usize,
    /// Whether fill values must be materialized in holes.
    pub needsfill: bool,
    /// Per-peer send counts for compute→IO rearrangement (one entry per IO
    /// task), derived by decomposition construction (out of scope, spec §1)
    /// and carried here as already-computed input to `swapm`.
    pub send_counts: Vec<usize>,
    /// Per-peer receive counts for IO→compute rearrangement.
    pub recv_counts: Vec<usize>,
}

impl Decomposition {
    /// Validates the invariants spec §3 states for a `Decomposition`:
    /// `BOX` has `holegridsize == 0`, `maxiobuflen >= llen`.
    pub fn validate(&self) -> Result<()> {
        if self.rearranger == RearrangerKind::Box && self.holegridsize != 0 {
            return Err(PioError::Inval("BOX decomposition must have holegridsize == 0".into()));
        }
        if self.maxiobuflen < self.llen {
            return Err(PioError::Inval("maxiobuflen must be >= llen".into()));
        }
        Ok(())
    }

    /// The max of `maxregions`/`maxfillregions`, used by the region-cap flush
    /// trigger (spec §4.5).
    pub fn max_regions(&self) -> usize {
        self.maxregions.max(self.maxfillregions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_decomp() -> Decomposition {
        Decomposition {
            rearranger: RearrangerKind::Box,
            ndof: 100,
            llen: 50,
            maxiobuflen: 50,
            mpitype_size: 8,
            piotype_size: 8,
            maxregions: 4,
            maxfillregions: 0,
            holegridsize: 0,
            maxholegridsize: 0,
            needsfill: false,
            send_counts: vec![50, 50],
            recv_counts: vec![50],
        }
    }

    #[test]
    fn box_with_holes_is_invalid() {
        let mut d = box_decomp();
        d.holegridsize = 1;
        assert!(d.validate().is_err());
    }

    #[test]
    fn maxiobuflen_below_llen_is_invalid() {
        let mut d = box_decomp();
        d.maxiobuflen = 10;
        assert!(d.validate().is_err());
    }

    #[test]
    fn valid_box_decomposition_passes() {
        assert!(box_decomp().validate().is_ok());
    }
}
