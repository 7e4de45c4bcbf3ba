//! File handle and variable descriptor (spec §3)

use crate::error::PioError;
use crate::Result;
use crate::wmb::{WmbChain, WmbKey};
use std::collections::HashMap;

/// Backend storage format (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    SerialV3,
    SerialV4,
    ParallelV3,
    ParallelV4,
}

impl BackendType {
    pub fn is_parallel(self) -> bool {
        matches!(self, BackendType::ParallelV3 | BackendType::ParallelV4)
    }
}

bitflags_like_mode::mode_bits! {
    /// File open mode bits (spec §3: "mode bits (read/write)").
    pub struct FileMode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// One variable's bookkeeping (spec §3 "Variable descriptor").
#[derive(Debug, Clone)]
pub struct VariableDescriptor {
    pub varid: i32,
    /// Element size in bytes for this variable's storage type.
    pub element_size: usize,
    /// Current record index; `-1` for non-record variables (spec §3
    /// invariant: `record >= 0` iff the variable has an unlimited dimension).
    pub record: i32,
    /// Cached fill value, allocated lazily on first use.
    pub fillvalue: Option<Vec<u8>>,
    /// Bytes queued but not yet flushed for this variable.
    pub pending_bytes: usize,
}

impl VariableDescriptor {
    pub fn new(varid: i32, element_size: usize, is_record: bool) -> Self {
        VariableDescriptor {
            varid,
            element_size,
            record: if is_record { 0 } else { -1 },
            fillvalue: None,
            pending_bytes: 0,
        }
    }

    pub fn is_record(&self) -> bool {
        self.record >= 0
    }
}

/// The I/O-side scratch buffers a file carries between rearrangement and
/// backend dispatch (spec §3 "Scratch I/O buffer"). Both fields hold a
/// handle into the process-wide buffer pool rather than owned bytes, so the
/// pool's `curalloc`/resource-release accounting (spec §8 Testable
/// Property 8) reflects exactly what a file still has outstanding.
#[derive(Default)]
pub struct Scratch {
    /// Primary data scratch buffer; at most one outstanding at a time
    /// (spec §3 invariant, asserted by the write path).
    pub iobuf: Option<crate::buffer_pool::BlockId>,
    /// Per-variable fill scratch buffers for the holegrid fill pass
    /// (spec §4.6 step 8).
    pub fillbuf: Option<crate::buffer_pool::BlockId>,
}

/// An open file (spec §3 "File handle").
pub struct File {
    pub file_id: i32,
    pub backend: BackendType,
    pub mode: FileMode,
    pub wmbs: WmbChain,
    pub scratch: Scratch,
    variables: HashMap<i32, VariableDescriptor>,
}

impl File {
    pub fn new(file_id: i32, backend: BackendType, mode: FileMode) -> Self {
        File { file_id, backend, mode, wmbs: WmbChain::new(), scratch: Scratch::default(), variables: HashMap::new() }
    }

    pub fn is_writable(&self) -> bool {
        self.mode.contains(FileMode::WRITE)
    }

    pub fn define_variable(&mut self, var: VariableDescriptor) {
        self.variables.insert(var.varid, var);
    }

    pub fn variable(&self, varid: i32) -> Result<&VariableDescriptor> {
        self.variables.get(&varid).ok_or_else(|| PioError::BadId(format!("unknown variable id {varid}")))
    }

    pub fn variable_mut(&mut self, varid: i32) -> Result<&mut VariableDescriptor> {
        self.variables.get_mut(&varid).ok_or_else(|| PioError::BadId(format!("unknown variable id {varid}")))
    }

    /// Asserts the at-most-one-outstanding-`iobuf` invariant (spec §3).
    pub fn assert_no_outstanding_iobuf(&self) -> Result<()> {
        if self.scratch.iobuf.is_some() {
            return Err(PioError::Inval("an iobuf is already outstanding for this file".into()));
        }
        Ok(())
    }

    /// Zeroes every per-variable and per-file pending-byte counter (spec
    /// §4.6 step 9, the non-`PARALLEL_V3` completion path).
    pub fn clear_pending_bytes(&mut self) {
        for var in self.variables.values_mut() {
            var.pending_bytes = 0;
        }
    }

    pub fn wmb_key(ioid: i32, recordvar: bool) -> Result<WmbKey> {
        if ioid < 0 {
            return Err(PioError::Inval(format!("ioid {ioid} must be >= 0")));
        }
        Ok(WmbKey { ioid, recordvar })
    }
}

/// A tiny hand-rolled bitflags replacement: the example pack's
/// `bitflags`-style crates are not in the teacher's dependency set and this
/// file only needs two bits, so it is implemented inline rather than pulling
/// in a new dependency for it.
mod bitflags_like_mode {
    macro_rules! mode_bits {
        (
            $(#[$meta:meta])*
            pub struct $name:ident: $repr:ty {
                $(const $flag:ident = $value:expr;)*
            }
        ) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name($repr);

            impl $name {
                $(pub const $flag: $name = $name($value);)*

                pub fn contains(self, other: $name) -> bool {
                    (self.0 & other.0) == other.0
                }
            }

            impl std::ops::BitOr for $name {
                type Output = $name;
                fn bitor(self, rhs: $name) -> $name {
                    $name(self.0 | rhs.0)
                }
            }
        };
    }
    pub(crate) use mode_bits;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_only_mode_is_writable_but_not_readable() {
        let f = File::new(1, BackendType::SerialV3, FileMode::WRITE);
        assert!(f.is_writable());
        assert!(!f.mode.contains(FileMode::READ));
    }

    #[test]
    fn read_write_mode_contains_both_bits() {
        let mode = FileMode::READ | FileMode::WRITE;
        assert!(mode.contains(FileMode::READ));
        assert!(mode.contains(FileMode::WRITE));
    }

    #[test]
    fn variable_lookup_fails_with_bad_id_for_unknown_varid() {
        let f = File::new(1, BackendType::SerialV3, FileMode::WRITE);
        assert!(matches!(f.variable(42), Err(PioError::BadId(_))));
    }

    #[test]
    fn non_record_variable_has_negative_record_index() {
        let v = VariableDescriptor::new(1, 8, false);
        assert_eq!(v.record, -1);
        assert!(!v.is_record());
    }

    #[test]
    fn second_iobuf_before_release_is_rejected() {
        let mut f = File::new(1, BackendType::ParallelV3, FileMode::WRITE);
        f.scratch.iobuf = Some(crate::buffer_pool::BlockId(0));
        assert!(f.assert_no_outstanding_iobuf().is_err());
    }
}
