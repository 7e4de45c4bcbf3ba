//! Process-wide tunables (spec §6, §9)
//!
//! Mirrors the teacher's `config::Config` struct-of-fields style: a single
//! serde-derived struct with `#[serde(default = "...")]` helpers, even though
//! this crate has no CLI of its own (configuration loading/wiring is out of
//! scope per spec §1) — a host embedding the library can still serialize its
//! own copy of `PioConfig` the way the teacher's `config::toml` module
//! round-trips `Config`.

use serde::{Deserialize, Serialize};

/// Default `pio_buffer_size_limit`: 10 MiB (spec §4.5).
pub const DEFAULT_BUFFER_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Flow-control ceiling for `swapm`'s `gather` routine (spec §4.2, §6).
pub const MAX_GATHER_BLOCK_SIZE: usize = 64;

/// Process-wide configuration for the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PioConfig {
    /// Use the system allocator instead of the integrated slab pool (§4.1).
    #[serde(default)]
    pub use_malloc: bool,

    /// Enable the diagnostic sink (§7).
    #[serde(default = "default_enable_logging")]
    pub enable_logging: bool,

    /// Cap on projected I/O-side regions before a disk flush is forced (§4.5).
    #[serde(default = "default_max_cached_io_regions")]
    pub max_cached_io_regions: usize,
}

impl Default for PioConfig {
    fn default() -> Self {
        PioConfig {
            use_malloc: false,
            enable_logging: default_enable_logging(),
            max_cached_io_regions: default_max_cached_io_regions(),
        }
    }
}

fn default_enable_logging() -> bool {
    true
}

fn default_max_cached_io_regions() -> usize {
    128
}

impl PioConfig {
    /// Builds the pool variant this config selects — `MallocPool` when
    /// `use_malloc` is set, `SlabPool` otherwise (spec §4.1, `PIO_USE_MALLOC`).
    pub fn build_pool(&self, capacity: usize) -> Box<dyn crate::buffer_pool::Pool + Send> {
        crate::buffer_pool::new_pool(self.use_malloc, capacity)
    }
}

/// Process-wide `pio_buffer_size_limit`, read lock-free and written assuming
/// quiescence (spec §5: "writes are assumed to be quiescent (only applied to
/// files opened after the change)").
///
/// Stored outside `PioConfig` because it has its own accessor contract
/// (`set_buffer_size_limit` returns the *previous* value, per spec §4.5/§6).
static BUFFER_SIZE_LIMIT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(DEFAULT_BUFFER_SIZE_LIMIT);

/// Sets the process-wide WMB memory budget and returns the previous value.
///
/// Only applies to files opened after the call returns (spec §4.5).
pub fn set_buffer_size_limit(n: usize) -> usize {
    use std::sync::atomic::Ordering;
    BUFFER_SIZE_LIMIT.swap(n, Ordering::SeqCst)
}

/// Reads the current process-wide WMB memory budget.
pub fn buffer_size_limit() -> usize {
    use std::sync::atomic::Ordering;
    BUFFER_SIZE_LIMIT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::Pool;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = PioConfig::default();
        assert!(!cfg.use_malloc);
        assert!(cfg.enable_logging);
        assert_eq!(buffer_size_limit(), DEFAULT_BUFFER_SIZE_LIMIT);
    }

    #[test]
    fn build_pool_honors_use_malloc() {
        let slab_cfg = PioConfig { use_malloc: false, ..PioConfig::default() };
        let mut slab = slab_cfg.build_pool(128);
        let b = slab.acquire(64).unwrap();
        assert_eq!(slab.block(b).len(), 64);

        let malloc_cfg = PioConfig { use_malloc: true, ..PioConfig::default() };
        let mut malloc = malloc_cfg.build_pool(128);
        let b = malloc.acquire(64).unwrap();
        assert_eq!(malloc.block(b).len(), 64);
        assert_eq!(malloc.stats().maxfree, malloc.stats().totfree, "MallocPool reports a loose maxfree bound");
    }

    #[test]
    fn set_buffer_size_limit_returns_previous_value() {
        let original = buffer_size_limit();
        let prev = set_buffer_size_limit(4096);
        assert_eq!(prev, original);
        assert_eq!(buffer_size_limit(), 4096);
        // restore so other tests in this process see the default
        set_buffer_size_limit(original);
    }
}
