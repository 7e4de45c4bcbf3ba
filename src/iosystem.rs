//! `IOSystem` (spec §3)
//!
//! Groups a compute communicator, an I/O communicator, and a union
//! communicator, plus the `async` flag and per-task role bits. Process-group
//! construction itself — how the underlying communicators are wired up — is
//! out of scope (spec §1); `IoSystem` is handed already-constructed
//! `Communicator`s, the same way the teacher's `engine::IOEngine` consumers
//! are handed an already-opened file descriptor rather than opening it
//! themselves.

use crate::comm::Communicator;
use crate::error::PioError;
use crate::Result;
use std::sync::Arc;

/// Per-task membership in the compute/IO split (spec §3 invariant: "every
/// task belongs to exactly one of {compute-only, IO-only, both} and the role
/// bits agree with membership").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    ComputeOnly,
    IoOnly,
    Both,
}

/// Groups the three communicators an `IOSystem` carries (spec §3) plus the
/// derived role bits for this task.
pub struct IoSystem {
    pub compute_comm: Option<Arc<dyn Communicator>>,
    pub io_comm: Option<Arc<dyn Communicator>>,
    pub union_comm: Arc<dyn Communicator>,
    /// True when compute and I/O are disjoint groups (spec §3).
    pub async_system: bool,
    membership: Membership,
}

impl IoSystem {
    /// Builds an `IOSystem` from already-constructed communicators.
    /// `compute_comm`/`io_comm` are `None` exactly when this task does not
    /// belong to that group.
    pub fn new(
        compute_comm: Option<Arc<dyn Communicator>>,
        io_comm: Option<Arc<dyn Communicator>>,
        union_comm: Arc<dyn Communicator>,
        async_system: bool,
    ) -> Result<Self> {
        let membership = match (&compute_comm, &io_comm) {
            (Some(_), Some(_)) => Membership::Both,
            (Some(_), None) => Membership::ComputeOnly,
            (None, Some(_)) => Membership::IoOnly,
            (None, None) => {
                return Err(PioError::Inval(
                    "a task must belong to at least one of the compute or IO communicators".into(),
                ))
            }
        };
        Ok(IoSystem { compute_comm, io_comm, union_comm, async_system, membership })
    }

    /// Non-disjoint convenience constructor: compute and I/O communicators
    /// are the same communicator (`async_system = false`).
    pub fn synchronous(comm: Arc<dyn Communicator>) -> Self {
        IoSystem {
            compute_comm: Some(comm.clone()),
            io_comm: Some(comm.clone()),
            union_comm: comm,
            async_system: false,
            membership: Membership::Both,
        }
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// `ioproc`: participates in actual I/O (spec §3).
    pub fn is_ioproc(&self) -> bool {
        self.io_comm.is_some()
    }

    pub fn is_compute(&self) -> bool {
        self.compute_comm.is_some()
    }

    /// `compmaster`: rank 0 of the compute communicator (spec §3).
    pub fn is_compmaster(&self) -> bool {
        self.compute_comm.as_ref().is_some_and(|c| c.rank() == 0)
    }

    /// `iomaster`: rank 0 of the I/O communicator (spec §3).
    pub fn is_iomaster(&self) -> bool {
        self.io_comm.as_ref().is_some_and(|c| c.rank() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::null::NullCommunicator;

    #[test]
    fn synchronous_system_has_matching_compute_and_io_comms() {
        let comm = Arc::new(NullCommunicator::new());
        let ios = IoSystem::synchronous(comm);
        assert!(!ios.async_system);
        assert_eq!(ios.membership(), Membership::Both);
        assert!(ios.is_ioproc());
        assert!(ios.is_compute());
        assert!(ios.is_compmaster());
        assert!(ios.is_iomaster());
    }

    #[test]
    fn task_belonging_to_neither_group_is_rejected() {
        let union_comm = Arc::new(NullCommunicator::new());
        let result = IoSystem::new(None, None, union_comm, true);
        assert!(result.is_err());
    }

    #[test]
    fn io_only_task_is_not_compmaster() {
        let io_comm = Arc::new(NullCommunicator::new());
        let union_comm = Arc::new(NullCommunicator::new());
        let ios = IoSystem::new(None, Some(io_comm), union_comm, true).unwrap();
        assert_eq!(ios.membership(), Membership::IoOnly);
        assert!(!ios.is_compute());
        assert!(!ios.is_compmaster());
        assert!(ios.is_iomaster());
    }
}
