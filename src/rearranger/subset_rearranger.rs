//! `SUBSET` (sparse, with holes) rearranger (spec §4.3)
//!
//! Some destination slots may have no contribution at all. These are
//! tracked as a holegrid of size `iodesc.holegridsize` per I/O task.
//! `needsfill` indicates a second pass must write the fill value there —
//! but that pass is the write orchestrator's job (spec §4.6 step 8), not
//! this rearranger's: it only reports the holegrid extents via the
//! decomposition it was given.

use super::{swapm_one_variable_comp2io, swapm_one_variable_io2comp, Rearranger};
use crate::comm::Communicator;
use crate::decomp::Decomposition;
use crate::Result;

pub struct SubsetRearranger;

impl Rearranger for SubsetRearranger {
    fn rearrange_comp2io(
        &self,
        comm: &dyn Communicator,
        iodesc: &Decomposition,
        src: &[u8],
        dst: &mut [u8],
        nvars: usize,
        _fillvalues: Option<&[Vec<u8>]>,
    ) -> Result<()> {
        // No pre-fill here, unlike BoxRearranger: holes are left untouched
        // and are the orchestrator's separate FILL-mode write (spec §4.6.8).
        let src_stride = iodesc.ndof * iodesc.mpitype_size;
        let dst_stride = iodesc.maxiobuflen * iodesc.mpitype_size;

        for v in 0..nvars {
            let src_var = &src[v * src_stride..(v + 1) * src_stride];
            let dst_var = &mut dst[v * dst_stride..(v + 1) * dst_stride];
            swapm_one_variable_comp2io(comm, iodesc, src_var, dst_var)?;
        }
        Ok(())
    }

    fn rearrange_io2comp(
        &self,
        comm: &dyn Communicator,
        iodesc: &Decomposition,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<()> {
        swapm_one_variable_io2comp(comm, iodesc, src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::channel::new_channel_universe;
    use crate::decomp::RearrangerKind;
    use std::thread;

    fn decomp_with_hole(rank: usize, nprocs: usize) -> Decomposition {
        // 1 compute task (rank 0) contributes 3 of the 5 slots on the
        // single IO task (rank 1); the remaining 2 are a hole.
        let mut send_counts = vec![0; nprocs];
        let mut recv_counts = vec![0; nprocs];
        if rank == 0 {
            send_counts[1] = 3;
        } else {
            recv_counts[0] = 3;
        }
        Decomposition {
            rearranger: RearrangerKind::Subset,
            ndof: 3,
            llen: 5,
            maxiobuflen: 5,
            mpitype_size: 8,
            piotype_size: 8,
            maxregions: 1,
            maxfillregions: 1,
            holegridsize: 2,
            maxholegridsize: 2,
            needsfill: true,
            send_counts,
            recv_counts,
        }
    }

    /// S4-shaped: SUBSET with a hole; the rearranger leaves the hole region
    /// untouched (fill is the orchestrator's job, not the rearranger's).
    #[test]
    fn holes_are_left_untouched_by_the_rearranger() {
        let nprocs = 2;
        let comms = new_channel_universe(nprocs);
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                thread::spawn(move || {
                    let iodesc = decomp_with_hole(rank, nprocs);
                    let rearranger = SubsetRearranger;
                    if rank == 0 {
                        let src: Vec<u8> = (1i64..=3).flat_map(|v| v.to_le_bytes()).collect();
                        // Every rank's rearrange_comp2io call slices dst by the full
                        // maxiobuflen*mpitype_size stride regardless of this rank's own
                        // role, matching what the write orchestrator always provisions.
                        let mut dst = vec![0u8; iodesc.maxiobuflen * iodesc.mpitype_size];
                        rearranger.rearrange_comp2io(&comm, &iodesc, &src, &mut dst, 1, None).unwrap();
                        None
                    } else {
                        let src = vec![0u8; 0];
                        // Sentinel-fill dst first so we can see what the
                        // rearranger did *not* touch.
                        let mut dst = vec![0xEEu8; iodesc.maxiobuflen * iodesc.mpitype_size];
                        rearranger.rearrange_comp2io(&comm, &iodesc, &src, &mut dst, 1, None).unwrap();
                        Some(dst)
                    }
                })
            })
            .collect();

        let io_result = handles.into_iter().map(|h| h.join().unwrap()).flatten().next().unwrap();
        let values: Vec<i64> = io_result.chunks(8).map(|c| i64::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(&values[0..3], &[1, 2, 3]);
        // The remaining 2 slots (the hole) are exactly the sentinel, meaning
        // the rearranger never wrote them.
        assert_eq!(io_result[24], 0xEE);
        assert_eq!(io_result[32.min(io_result.len() - 1)], 0xEE);
    }
}
