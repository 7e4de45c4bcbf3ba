//! Rearrangement (spec §4.3)
//!
//! Moves payload between compute-side layout and I/O-side layout given a
//! [`Decomposition`](crate::decomp::Decomposition), using [`swapm`]. Two
//! flavors: [`box_rearranger`] (dense) and [`subset_rearranger`] (sparse,
//! with holes).

pub mod box_rearranger;
pub mod subset_rearranger;

use crate::comm::Communicator;
use crate::decomp::Decomposition;
use crate::swapm::{swapm, PeerLayout, SwapmOptions};
use crate::Result;

/// Public rearrangement contract (spec §4.3).
pub trait Rearranger {
    /// Moves `nvars` variables' worth of compute-side payload in `src` into
    /// the I/O-side scratch buffer `dst`.
    ///
    /// `src` holds `nvars` consecutive blocks of `iodesc.ndof *
    /// mpitype_size` bytes; `dst` holds `nvars` consecutive blocks of
    /// `iodesc.maxiobuflen * mpitype_size` bytes (spec §3, "Scratch I/O
    /// buffer").
    fn rearrange_comp2io(
        &self,
        comm: &dyn Communicator,
        iodesc: &Decomposition,
        src: &[u8],
        dst: &mut [u8],
        nvars: usize,
        fillvalues: Option<&[Vec<u8>]>,
    ) -> Result<()>;

    /// The symmetric read-path transfer: I/O-side `src` into compute-side
    /// `dst`, single variable (spec §6, `read_darray`).
    fn rearrange_io2comp(
        &self,
        comm: &dyn Communicator,
        iodesc: &Decomposition,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<()>;
}

/// Shared comp2io transfer for a single variable: both flavors reduce to
/// this call into `swapm` with the decomposition's per-peer counts.
pub(crate) fn swapm_one_variable_comp2io(
    comm: &dyn Communicator,
    iodesc: &Decomposition,
    src_var: &[u8],
    dst_var: &mut [u8],
) -> Result<()> {
    let send = PeerLayout::new(iodesc.send_counts.clone(), contiguous_displs(&iodesc.send_counts));
    let recv = PeerLayout::new(iodesc.recv_counts.clone(), contiguous_displs(&iodesc.recv_counts));
    swapm(comm, &send, src_var, &recv, dst_var, iodesc.mpitype_size, &SwapmOptions::default())
}

/// Reverses the roles for the read path: what was received on comp2io is now
/// sent, and vice versa.
pub(crate) fn swapm_one_variable_io2comp(
    comm: &dyn Communicator,
    iodesc: &Decomposition,
    src_var: &[u8],
    dst_var: &mut [u8],
) -> Result<()> {
    let send = PeerLayout::new(iodesc.recv_counts.clone(), contiguous_displs(&iodesc.recv_counts));
    let recv = PeerLayout::new(iodesc.send_counts.clone(), contiguous_displs(&iodesc.send_counts));
    swapm(comm, &send, src_var, &recv, dst_var, iodesc.mpitype_size, &SwapmOptions::default())
}

fn contiguous_displs(counts: &[usize]) -> Vec<usize> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut acc = 0;
    for &c in counts {
        displs.push(acc);
        acc += c;
    }
    displs
}
