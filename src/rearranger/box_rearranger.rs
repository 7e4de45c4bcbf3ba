//! `BOX` (dense) rearranger (spec §4.3)
//!
//! Every destination slot on every I/O task is covered by exactly one source
//! contribution, after optionally pre-filling the destination with
//! `fillvalue` — the pre-fill happens iff `iodesc.needsfill`.

use super::{swapm_one_variable_comp2io, swapm_one_variable_io2comp, Rearranger};
use crate::comm::Communicator;
use crate::decomp::Decomposition;
use crate::error::PioError;
use crate::Result;

pub struct BoxRearranger;

impl Rearranger for BoxRearranger {
    fn rearrange_comp2io(
        &self,
        comm: &dyn Communicator,
        iodesc: &Decomposition,
        src: &[u8],
        dst: &mut [u8],
        nvars: usize,
        fillvalues: Option<&[Vec<u8>]>,
    ) -> Result<()> {
        let src_stride = iodesc.ndof * iodesc.mpitype_size;
        let dst_stride = iodesc.maxiobuflen * iodesc.mpitype_size;

        if iodesc.needsfill {
            let fillvalues = fillvalues
                .ok_or_else(|| PioError::Inval("needsfill requires per-variable fillvalues".into()))?;
            if fillvalues.len() != nvars {
                return Err(PioError::Inval("fillvalues length must equal nvars".into()));
            }
            for v in 0..nvars {
                prefill(&mut dst[v * dst_stride..(v + 1) * dst_stride], &fillvalues[v]);
            }
        }

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

fn prefill(region: &mut [u8], fillvalue: &[u8]) {
    if fillvalue.is_empty() {
        return;
    }
    for chunk in region.chunks_mut(fillvalue.len()) {
        chunk.copy_from_slice(&fillvalue[..chunk.len()]);
    }
}
