//! pario - Parallel scientific array I/O core
//!
//! A library (no CLI — the core is embedded in host applications) for moving
//! decomposed array data between a compute task group and an I/O task group:
//! aggregation into a write-multi-buffer, a flush controller that decides
//! when to drain it, rearrangement between compute and I/O layout over a
//! collective point-to-point exchange engine, and dispatch to a pluggable
//! file-format backend.
//!
//! # Architecture
//!
//! - **Buffer pool**: process-wide slab allocator backing every WMB payload
//!   and scratch I/O buffer, so flush heuristics see real memory pressure.
//! - **Collective exchange engine (swapm)**: bounded-concurrency pairwise
//!   exchange over a `Communicator` abstraction.
//! - **Rearranger**: `BOX` (dense) and `SUBSET` (sparse, with holes) layout
//!   transforms built on `swapm`.
//! - **Write-multi-buffer / flush controller**: the compute-side aggregation
//!   cache and the collective decision to drain it.
//! - **Orchestrator**: the public write/read entry points, driving iobuf
//!   lifecycle, backend dispatch, and the holegrid fill pass.

pub mod async_dispatch;
pub mod backend;
pub mod buffer_pool;
pub mod comm;
pub mod config;
pub mod decomp;
pub mod error;
pub mod file;
pub mod flush;
pub mod iosystem;
pub mod orchestrator;
pub mod rearranger;
pub mod swapm;
pub mod wmb;

pub use error::PioError;
pub use iosystem::IoSystem;
pub use orchestrator::{read_darray, write_darray, write_darray_multi};

/// Result type used throughout pario.
pub type Result<T> = std::result::Result<T, PioError>;
