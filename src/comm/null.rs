//! Single-rank communicator
//!
//! Used wherever a `Communicator` is required but the caller only has one
//! task (doctests, unit tests of a single rearranger step). Collectives are
//! trivial identity operations; point-to-point only supports self-send,
//! which is exactly the "self copy" path spec §4.2 carves out.

use super::{Communicator, Request, Tag};
use crate::error::PioError;
use crate::Result;
use std::cell::RefCell;
use std::collections::VecDeque;

/// A communicator of size 1. Sends to/receives from rank 0 (itself) only.
pub struct NullCommunicator {
    inbox: RefCell<VecDeque<(Tag, Vec<u8>)>>,
}

impl NullCommunicator {
    pub fn new() -> Self {
        NullCommunicator { inbox: RefCell::new(VecDeque::new()) }
    }
}

impl Default for NullCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: NullCommunicator owns a single-threaded RefCell and is never
// actually shared across threads concurrently (spec §5: one task, one thread).
unsafe impl Sync for NullCommunicator {}

impl Communicator for NullCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<Request> {
        if dest != 0 {
            return Err(PioError::Inval(format!("rank 0 cannot send to rank {dest}")));
        }
        self.inbox.borrow_mut().push_back((tag, data));
        Ok(Request::Null)
    }

    fn irecv(&self, src: usize, tag: Tag) -> Result<Request> {
        if src != 0 {
            return Err(PioError::Inval(format!("rank 0 cannot receive from rank {src}")));
        }
        Ok(Request::Recv { from: 0, tag })
    }

    fn wait(&self, req: Request) -> Result<Option<Vec<u8>>> {
        match req {
            Request::Null => Ok(None),
            Request::Recv { tag, .. } => {
                let mut inbox = self.inbox.borrow_mut();
                let pos = inbox.iter().position(|(t, _)| *t == tag);
                match pos {
                    Some(i) => Ok(Some(inbox.remove(i).unwrap().1)),
                    None => Err(PioError::MpiFail(format!("no message with tag {tag} queued"))),
                }
            }
        }
    }

    fn all_reduce_max(&self, value: i32) -> Result<i32> {
        Ok(value)
    }

    fn broadcast(&self, root: usize, data: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if root != 0 {
            return Err(PioError::Inval("root must be 0 in a single-rank communicator".into()));
        }
        data.ok_or_else(|| PioError::Inval("broadcast root must supply data".into()))
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_send_round_trips() {
        let comm = NullCommunicator::new();
        comm.send(0, 7, vec![1, 2, 3]).unwrap();
        let got = comm.recv(0, 7).unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn all_reduce_max_is_identity() {
        let comm = NullCommunicator::new();
        assert_eq!(comm.all_reduce_max(2).unwrap(), 2);
    }
}
