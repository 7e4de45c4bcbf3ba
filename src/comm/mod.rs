//! Transport abstraction for the collective exchange engine
//!
//! Process-group construction (how ranks are wired together, real MPI
//! bindings, etc.) is explicitly out of scope (spec §1) — the same way the
//! teacher's `engine::IOEngine` trait abstracts away `io_uring` vs `libaio`
//! vs a plain syscall behind one interface and lets callers stay agnostic.
//! `Communicator` plays that role here for the point-to-point and collective
//! primitives `swapm` and the flush controller build on.

pub mod channel;
pub mod null;

use crate::Result;

/// Message tag. The exchange engine's tag discipline (spec §4.2) guarantees
/// no collision between a data message and a handshake message, which is
/// what `comm::channel::ChannelCommunicator::wait`'s FIFO `(from, tag)`
/// matching needs to tell the two kinds of in-flight message apart: handshake
/// tags live in `[0, nprocs)`, data tags in `[nprocs, 2*nprocs)`, so the two
/// namespaces never overlap for any sender/receiver pair.
pub type Tag = u32;

/// `data_tag = senderRank + nprocs` (spec §4.2).
pub fn data_tag(sender_rank: usize, nprocs: usize) -> Tag {
    (sender_rank + nprocs) as Tag
}

/// `handshake_tag = receiverRank` (spec §4.2), kept disjoint from `data_tag`'s
/// `[nprocs, 2*nprocs)` range so the two message kinds never collide on the
/// same `(from, tag)` key in a rank's inbox.
pub fn handshake_tag(receiver_rank: usize, _nprocs: usize) -> Tag {
    receiver_rank as Tag
}

/// The XOR-based pairwise exchange schedule (spec §4.2, preserved verbatim
/// per the Design Notes' warning against ad-hoc replacement: "an edge-coloring
/// of the hypercube ... replacements risk deadlock when combined with the
/// handshake ready-send pattern").
///
/// Returns the partner rank for `me` at `istep`, or `None` if `me` has no
/// partner at this step (can happen when `np` is not a power of two).
pub fn pair(np: usize, istep: usize, me: usize) -> Option<usize> {
    if np == 0 {
        return None;
    }
    let xor = (istep + 1) as i64;
    let p = (me as i64 + 1) ^ xor;
    let p = p - 1;
    if p < 0 || p as usize >= np {
        None
    } else {
        Some(p as usize)
    }
}

/// Total pairwise steps the engine schedules, per spec §4.2:
/// `istep = 0 .. ceil(log2(nprocs)) * 2 - 2`.
pub fn pair_schedule_steps(nprocs: usize) -> usize {
    if nprocs <= 1 {
        return 0;
    }
    let log2 = (usize::BITS - (nprocs - 1).leading_zeros()) as usize; // ceil(log2(nprocs))
    log2.saturating_mul(2).saturating_sub(2)
}

/// A pending non-blocking operation. `wait` resolves it; for a receive this
/// yields the payload, for a send it yields nothing.
pub enum Request {
    /// Already complete — nothing to wait for (used for the self-copy path
    /// and for sends, which in this in-process transport never block).
    Null,
    /// A posted receive awaiting bytes from `from` tagged `tag`.
    Recv { from: usize, tag: Tag },
}

/// Point-to-point and collective transport used by `swapm` and the flush
/// controller. Implementors need not be thread-safe in the general sense —
/// spec §5 guarantees each task drives its own communicator single-threadedly
/// — but must be `Send` so a `Communicator` can be handed to worker state
/// that migrates across threads in tests.
pub trait Communicator: Send {
    /// This task's rank within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Post a non-blocking send. In this transport sends never block the
    /// caller, so the returned `Request` is always `Request::Null`.
    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<Request>;

    /// Post a non-blocking receive; does not block.
    fn irecv(&self, src: usize, tag: Tag) -> Result<Request>;

    /// Blocking send (spec §4.2: "standard send ... when `isend` is off").
    fn send(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<()> {
        self.isend(dest, tag, data)?;
        Ok(())
    }

    /// Ready-send (spec §4.2: used when `handshake` is on). This transport
    /// does not enforce the MPI ready-send precondition that the receiver
    /// must already be waiting — process-group/transport internals are out
    /// of scope (spec §1) — so it behaves like `send`.
    fn rsend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<()> {
        self.send(dest, tag, data)
    }

    /// Blocking receive.
    fn recv(&self, src: usize, tag: Tag) -> Result<Vec<u8>> {
        let req = self.irecv(src, tag)?;
        self.wait(req).map(|v| v.unwrap_or_default())
    }

    /// Resolve a `Request` previously returned by `isend`/`irecv`.
    fn wait(&self, req: Request) -> Result<Option<Vec<u8>>>;

    /// Collective all-reduce with MAX, used to synchronize the flush decision
    /// across the compute communicator (spec §4.5, §9 "Collective-agreement
    /// hazard").
    fn all_reduce_max(&self, value: i32) -> Result<i32>;

    /// Collective broadcast from `root`. Non-root callers pass `None`; every
    /// caller, including root, gets the broadcast bytes back.
    fn broadcast(&self, root: usize, data: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Collective barrier.
    fn barrier(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_symmetric() {
        // If q is my partner at istep, I should be q's partner at istep too,
        // for every (np, istep) combination the pair schedule actually uses.
        for np in [2usize, 4, 8] {
            for istep in 0..pair_schedule_steps(np) {
                for me in 0..np {
                    if let Some(q) = pair(np, istep, me) {
                        assert_eq!(pair(np, istep, q), Some(me), "np={np} istep={istep} me={me}");
                    }
                }
            }
        }
    }

    #[test]
    fn tags_never_collide_across_ranks() {
        let nprocs = 8;
        for sender in 0..nprocs {
            for receiver in 0..nprocs {
                assert_ne!(data_tag(sender, nprocs), handshake_tag(receiver, nprocs));
            }
        }
    }

    #[test]
    fn pair_schedule_steps_matches_spec_formula() {
        // np=1 => 0 steps (steps == 0 edge case, spec §4.2)
        assert_eq!(pair_schedule_steps(1), 0);
        // np=8 => ceil(log2(8))*2-2 = 3*2-2 = 4
        assert_eq!(pair_schedule_steps(8), 4);
    }
}
