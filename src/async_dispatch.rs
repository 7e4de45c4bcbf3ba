//! Async dispatcher (spec §4.7)
//!
//! When compute and I/O task groups are disjoint (`IoSystem::async_system`),
//! the compute-master packages a `write_darray_multi` call as a message and
//! broadcasts it to the I/O task group over the union communicator. The
//! field order below is fixed and is part of the wire contract (spec §4.7);
//! it is grounded in the teacher's `distributed/protocol.rs`
//! `serialize_message`/`read_message` framing (length-prefixed, versioned)
//! but carries this spec's fields instead of the teacher's heartbeat/results
//! payload.

use crate::Result;
use serde::{Deserialize, Serialize};

/// The wire contract for one write dispatch (spec §4.7):
/// `ncid, nvars, varids[nvars], ioid, arraylen, payload_bytes, frame_present,
/// [frame[nvars] if present], fillvalue_present, [fillvalue bytes if
/// present], flushtodisk`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteDispatch {
    pub ncid: i32,
    pub varids: Vec<i32>,
    pub ioid: i32,
    pub arraylen: usize,
    pub payload: Vec<u8>,
    pub frames: Option<Vec<i32>>,
    pub fillvalues: Option<Vec<Vec<u8>>>,
    pub flushtodisk: bool,
}

impl WriteDispatch {
    /// Serializes this dispatch for the broadcast (length-prefixing is the
    /// transport's concern, not this payload's — mirrors the teacher's
    /// `serialize_message`, which hands a plain byte vector to the framing
    /// layer below it).
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl From<rmp_serde::encode::Error> for crate::error::PioError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        crate::error::PioError::MpiFail(format!("failed to encode write dispatch: {err}"))
    }
}

impl From<rmp_serde::decode::Error> for crate::error::PioError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        crate::error::PioError::MpiFail(format!("failed to decode write dispatch: {err}"))
    }
}

/// Broadcasts `dispatch` from the compute-master to every task on
/// `union_comm` (spec §4.7: "All broadcasts use the compute-master as root
/// and the intercommunicator between compute and I/O"). Non-root callers
/// pass `None` and receive the decoded dispatch back.
pub fn broadcast_dispatch(
    union_comm: &dyn crate::comm::Communicator,
    root: usize,
    dispatch: Option<&WriteDispatch>,
) -> Result<WriteDispatch> {
    let encoded = dispatch.map(|d| d.encode()).transpose()?;
    let bytes = union_comm.broadcast(root, encoded)?;
    WriteDispatch::decode(&bytes)
}
