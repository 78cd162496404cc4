//! # qwalk-core
//!
//! Pairwise distance/displacement table engine for particle-based
//! simulations running many independent replicas ("walkers").
//!
//! The engine maintains, incrementally updates, and queries
//! inter-particle distances under single-particle trial moves, with a
//! batched cross-replica dispatch path that can run on the host (rayon)
//! or on an accelerator (`qwalk-gpu`).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │  BoundaryDistance  │  ← pluggable open/periodic formula
//! └─────────┬──────────┘
//!           │ fills
//! ┌─────────▼──────────┐     ┌──────────────────────┐
//! │ DistanceTableEngine │◀───│ PackedTriangularStore │
//! │ (move protocol)     │     └──────────────────────┘
//! └─────────┬──────────┘
//!           │ per-replica strides
//! ┌─────────▼──────────┐     ┌──────────────────────┐
//! │ BatchedMoveExecutor │───▶│ BatchBackend          │
//! │ (flat scratch)      │     │ host-parallel / CUDA │
//! └────────────────────┘     └──────────────────────┘
//! ```
//!
//! Failure semantics: configuration and device errors are `Result`s;
//! move-protocol misuse fails fast (see [`errors`]).

pub mod align;
pub mod batch;
pub mod boundary;
pub mod errors;
pub mod metrics;
pub mod neighbor;
pub mod positions;
pub mod store;
pub mod table;

pub use align::{aligned_size, SIMD_ALIGNMENT};
pub use batch::{
    BackendKind, BatchBackend, BatchConfig, BatchRequest, BatchScratch, BatchedMoveExecutor,
    HostParallelBackend, DEFAULT_CHUNK_SIZE,
};
pub use boundary::{
    BoundaryDescriptor, BoundaryDistance, BoundaryKind, OpenBoundary, PeriodicBoundary,
};
pub use errors::{QwalkError, Result};
pub use metrics::{LogMetrics, MetricsSink, NullMetrics, ScopedTimer, TableOp};
pub use neighbor::{NearestNeighborQuery, Neighbor};
pub use positions::{FusedNewPositions, ParticlePositions};
pub use store::{packed_size, DisplRow, DisplRowMut, PackedTriangularStore};
pub use table::{DistanceTableEngine, TableConfig, SENTINEL_DISTANCE};
