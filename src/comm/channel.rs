//! In-process multi-rank communicator
//!
//! Stands in for a real MPI communicator in tests and in single-process
//! embeddings of the core (process-group construction over real transport is
//! out of scope, spec §1). Point-to-point delivery uses a per-rank inbox
//! guarded by a `Mutex`/`Condvar`, the same shape the teacher's
//! `distributed::node_service` message loop uses for its inbound queue, just
//! without the TCP framing. Collectives are built on a small rendezvous
//! barrier shared by all ranks.

use super::{Communicator, Request, Tag};
use crate::error::PioError;
use crate::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

struct Envelope {
    from: usize,
    tag: Tag,
    data: Vec<u8>,
}

struct Inbox {
    queue: Mutex<VecDeque<Envelope>>,
    cv: Condvar,
}

/// Generic rendezvous point used for collectives: every rank contributes a
/// value and blocks until all `size` ranks have contributed, then all ranks
/// observe the combined result. Reusable across successive collective calls
/// via a generation counter (a sense-reversing barrier).
struct Rendezvous<T: Clone> {
    state: Mutex<RendezvousState<T>>,
    cv: Condvar,
    size: usize,
}

struct RendezvousState<T> {
    generation: u64,
    arrived: usize,
    values: Vec<Option<T>>,
    result: Option<T>,
}

impl<T: Clone> Rendezvous<T> {
    fn new(size: usize) -> Self {
        Rendezvous {
            state: Mutex::new(RendezvousState {
                generation: 0,
                arrived: 0,
                values: vec![None; size],
                result: None,
            }),
            cv: Condvar::new(),
            size,
        }
    }

    /// Contributes `value` at `rank` and blocks until every rank has
    /// contributed, then runs `combine` exactly once (by the last arriver)
    /// and returns the combined result to all ranks.
    fn rendezvous(&self, rank: usize, value: T, combine: impl FnOnce(&[Option<T>]) -> T) -> T {
        let mut guard = self.state.lock().unwrap();
        let my_generation = guard.generation;
        guard.values[rank] = Some(value);
        guard.arrived += 1;

        if guard.arrived == self.size {
            let result = combine(&guard.values);
            guard.result = Some(result.clone());
            guard.arrived = 0;
            guard.values = vec![None; self.size];
            guard.generation += 1;
            self.cv.notify_all();
            result
        } else {
            while guard.generation == my_generation {
                guard = self.cv.wait(guard).unwrap();
            }
            guard.result.clone().expect("rendezvous result missing after generation advance")
        }
    }
}

/// Shared state for one communicator "universe" — every `ChannelCommunicator`
/// handed out by [`new_channel_universe`] points at the same `Hub`.
struct Hub {
    inboxes: Vec<Inbox>,
    reduce_max: Rendezvous<i32>,
    broadcast: Rendezvous<Vec<u8>>,
    barrier: Rendezvous<()>,
}

/// One rank's handle into a [`Hub`].
pub struct ChannelCommunicator {
    rank: usize,
    hub: Arc<Hub>,
}

/// Builds `size` communicator handles sharing one in-process transport.
pub fn new_channel_universe(size: usize) -> Vec<ChannelCommunicator> {
    let hub = Arc::new(Hub {
        inboxes: (0..size)
            .map(|_| Inbox { queue: Mutex::new(VecDeque::new()), cv: Condvar::new() })
            .collect(),
        reduce_max: Rendezvous::new(size),
        broadcast: Rendezvous::new(size),
        barrier: Rendezvous::new(size),
    });

    (0..size)
        .map(|rank| ChannelCommunicator { rank, hub: hub.clone() })
        .collect()
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.inboxes.len()
    }

    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> Result<Request> {
        let inbox = self.hub.inboxes.get(dest).ok_or_else(|| {
            PioError::Inval(format!("no such rank {dest} in communicator of size {}", self.size()))
        })?;
        inbox.queue.lock().unwrap().push_back(Envelope { from: self.rank, tag, data });
        inbox.cv.notify_all();
        Ok(Request::Null)
    }

    fn irecv(&self, src: usize, tag: Tag) -> Result<Request> {
        if src >= self.size() {
            return Err(PioError::Inval(format!("no such rank {src} in communicator of size {}", self.size())));
        }
        Ok(Request::Recv { from: src, tag })
    }

    fn wait(&self, req: Request) -> Result<Option<Vec<u8>>> {
        match req {
            Request::Null => Ok(None),
            Request::Recv { from, tag } => {
                let inbox = &self.hub.inboxes[self.rank];
                let mut queue = inbox.queue.lock().unwrap();
                loop {
                    if let Some(pos) = queue.iter().position(|e| e.from == from && e.tag == tag) {
                        let envelope = queue.remove(pos).unwrap();
                        return Ok(Some(envelope.data));
                    }
                    queue = inbox.cv.wait(queue).unwrap();
                }
            }
        }
    }

    fn all_reduce_max(&self, value: i32) -> Result<i32> {
        Ok(self.hub.reduce_max.rendezvous(self.rank, value, |values| {
            values.iter().map(|v| v.expect("every rank must contribute")).max().unwrap()
        }))
    }

    fn broadcast(&self, root: usize, data: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let contribution = if self.rank == root {
            data.ok_or_else(|| PioError::Inval("broadcast root must supply data".to_string()))?
        } else {
            Vec::new()
        };
        Ok(self.hub.broadcast.rendezvous(self.rank, contribution, move |values| {
            values[root].clone().expect("root must contribute to broadcast")
        }))
    }

    fn barrier(&self) -> Result<()> {
        self.hub.barrier.rendezvous(self.rank, (), |_| ());
        Ok(())
    }
}
