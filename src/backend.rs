//! Backend contract (spec §1, §6)
//!
//! The file-format backends (classic/parallel × v3/v4) are an external
//! collaborator, specified only at their interface: a narrow write (and
//! read) contract the orchestrator dispatches to. This crate does not
//! implement file-format encoding (spec §1 Non-goals); [`Backend`] is the
//! trait boundary, mirrored on the teacher's `engine::IOEngine` abstraction
//! over `io_uring`/`libaio`/a plain syscall backend, and [`MemoryBackend`] is
//! a minimal in-memory implementation used by this crate's own orchestrator
//! tests (it plays the role the teacher's `engine::sync` backend plays in its
//! own test suite: a reference implementation simple enough to assert
//! against directly).

use crate::decomp::Decomposition;
use crate::file::File;
use crate::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Whether a backend dispatch writes primary data or fills decomposition
/// holes (spec §4.6 steps 6 and 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Data,
    Fill,
}

/// One dispatched write, as the backend sees it. `region` is the rearranged
/// I/O-side scratch buffer (`iobuf` for `Data`, `fillbuf` for `Fill`).
pub struct WriteRequest<'a> {
    pub nvars: usize,
    pub fndims: usize,
    pub varids: &'a [i32],
    pub iodesc: &'a Decomposition,
    pub mode: WriteMode,
    pub frame: Option<i32>,
    pub region: &'a [u8],
}

/// The file-format backend contract (spec §6 "Backend contract").
pub trait Backend: Send + Sync {
    /// Nonblocking parallel dispatch (`PARALLEL_V3`/`PARALLEL_V4`, spec §4.6
    /// step 6). Returns once the write has been handed off; for `PARALLEL_V3`
    /// completion is observed later via [`Backend::flush_output_buffer`].
    fn write_darray_multi_par(&self, file: &File, req: &WriteRequest) -> Result<()>;

    /// Serial dispatch (`SERIAL_V3`/`SERIAL_V4`): the I/O-master collects
    /// every I/O task's region and writes one record at a time.
    fn write_darray_multi_serial(&self, file: &File, req: &WriteRequest) -> Result<()>;

    /// Symmetric read, parallel variant.
    fn read_darray_par(&self, file: &File, iodesc: &Decomposition, varid: i32, out: &mut [u8]) -> Result<()>;

    /// Symmetric read, serial variant (`pio_read_darray_nc_serial`).
    fn read_darray_serial(&self, file: &File, iodesc: &Decomposition, varid: i32, out: &mut [u8]) -> Result<()>;

    /// Required only for the nonblocking parallel backend (`PARALLEL_V3`):
    /// completes any outstanding nonblocking write and, if `wait_for_disk`,
    /// blocks until the data has reached stable storage. `reserved` is
    /// unused (spec §6 carries it in the signature without giving it a
    /// meaning — preserved as-is).
    fn flush_output_buffer(&self, file: &File, wait_for_disk: bool, reserved: i32) -> Result<()>;
}

/// Key identifying one written record for [`MemoryBackend`]'s store:
/// `(file_id, varid, frame)`. Non-record variables use `frame = None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    file_id: i32,
    varid: i32,
    frame: Option<i32>,
}

/// A reference in-memory backend. Stores the last `Data` write per
/// `(file, varid, frame)` and the last `Fill` write per the same key,
/// keeping them distinct so tests can assert fill-pass coverage (spec §8
/// Testable Properties 5 and 6) without the two overwriting each other.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<RecordKey, Vec<u8>>>,
    fill: Mutex<HashMap<RecordKey, Vec<u8>>>,
    flush_calls: Mutex<Vec<(i32, bool)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn written_data(&self, file_id: i32, varid: i32, frame: Option<i32>) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(&RecordKey { file_id, varid, frame }).cloned()
    }

    pub fn written_fill(&self, file_id: i32, varid: i32, frame: Option<i32>) -> Option<Vec<u8>> {
        self.fill.lock().unwrap().get(&RecordKey { file_id, varid, frame }).cloned()
    }

    pub fn flush_calls(&self) -> Vec<(i32, bool)> {
        self.flush_calls.lock().unwrap().clone()
    }

    fn store(&self, file: &File, req: &WriteRequest) {
        let mut target = match req.mode {
            WriteMode::Data => self.data.lock().unwrap(),
            WriteMode::Fill => self.fill.lock().unwrap(),
        };
        let stride = req.region.len() / req.nvars.max(1);
        for (i, &varid) in req.varids.iter().enumerate() {
            let key = RecordKey { file_id: file.file_id, varid, frame: req.frame };
            target.insert(key, req.region[i * stride..(i + 1) * stride].to_vec());
        }
    }
}

impl Backend for MemoryBackend {
    fn write_darray_multi_par(&self, file: &File, req: &WriteRequest) -> Result<()> {
        self.store(file, req);
        Ok(())
    }

    fn write_darray_multi_serial(&self, file: &File, req: &WriteRequest) -> Result<()> {
        self.store(file, req);
        Ok(())
    }

    fn read_darray_par(&self, file: &File, _iodesc: &Decomposition, varid: i32, out: &mut [u8]) -> Result<()> {
        let stored = self.written_data(file.file_id, varid, None).unwrap_or_default();
        let n = out.len().min(stored.len());
        out[..n].copy_from_slice(&stored[..n]);
        Ok(())
    }

    fn read_darray_serial(&self, file: &File, iodesc: &Decomposition, varid: i32, out: &mut [u8]) -> Result<()> {
        self.read_darray_par(file, iodesc, varid, out)
    }

    fn flush_output_buffer(&self, file: &File, wait_for_disk: bool, _reserved: i32) -> Result<()> {
        self.flush_calls.lock().unwrap().push((file.file_id, wait_for_disk));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomp::RearrangerKind;
    use crate::file::{BackendType, File, FileMode};

    fn iodesc() -> Decomposition {
        Decomposition {
            rearranger: RearrangerKind::Box,
            ndof: 2,
            llen: 2,
            maxiobuflen: 2,
            mpitype_size: 8,
            piotype_size: 8,
            maxregions: 1,
            maxfillregions: 0,
            holegridsize: 0,
            maxholegridsize: 0,
            needsfill: false,
            send_counts: vec![2],
            recv_counts: vec![2],
        }
    }

    #[test]
    fn write_then_read_round_trips_through_memory_backend() {
        let backend = MemoryBackend::new();
        let file = File::new(1, BackendType::ParallelV3, FileMode::WRITE);
        let region: Vec<u8> = (1i64..=2).flat_map(|v| v.to_le_bytes()).collect();
        let req = WriteRequest {
            nvars: 1,
            fndims: 1,
            varids: &[7],
            iodesc: &iodesc(),
            mode: WriteMode::Data,
            frame: None,
            region: &region,
        };
        backend.write_darray_multi_par(&file, &req).unwrap();

        let mut out = vec![0u8; 16];
        backend.read_darray_par(&file, &iodesc(), 7, &mut out).unwrap();
        assert_eq!(out, region);
    }

    #[test]
    fn data_and_fill_writes_are_tracked_independently() {
        let backend = MemoryBackend::new();
        let file = File::new(1, BackendType::ParallelV3, FileMode::WRITE);
        let data_region = vec![1u8; 16];
        let fill_region = vec![0xFFu8; 16];
        let data_req = WriteRequest {
            nvars: 1,
            fndims: 1,
            varids: &[7],
            iodesc: &iodesc(),
            mode: WriteMode::Data,
            frame: None,
            region: &data_region,
        };
        let fill_req = WriteRequest { mode: WriteMode::Fill, region: &fill_region, ..data_req };
        backend.write_darray_multi_par(&file, &data_req).unwrap();
        backend.write_darray_multi_par(&file, &fill_req).unwrap();

        assert_eq!(backend.written_data(1, 7, None).unwrap(), data_region);
        assert_eq!(backend.written_fill(1, 7, None).unwrap(), fill_region);
    }

    #[test]
    fn flush_output_buffer_records_wait_for_disk_flag() {
        let backend = MemoryBackend::new();
        let file = File::new(1, BackendType::ParallelV3, FileMode::WRITE);
        backend.flush_output_buffer(&file, true, 0).unwrap();
        assert_eq!(backend.flush_calls(), vec![(1, true)]);
    }
}
