//! # qwalk-gpu
//!
//! CUDA offload backend for `qwalk-core`'s batched move proposal.
//!
//! One kernel does all the work: a 2D grid (source-particle chunks by
//! replicas) fills the executor's flat trial/backup buffer through a
//! device pointer table over per-replica position mirrors. Everything
//! stateful about the move protocol stays host-side in the executor.
//!
//! ```rust,no_run
//! use qwalk_core::{BatchConfig, BatchedMoveExecutor};
//! use qwalk_gpu::{CudaBatchBackend, GpuContext};
//!
//! let gpu = GpuContext::new(0, None)?;
//! let backend = CudaBatchBackend::<3>::new(&gpu)?;
//! let executor: BatchedMoveExecutor<3> =
//!     BatchedMoveExecutor::with_backend(BatchConfig::default(), Box::new(backend));
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod batched;
pub mod context;
pub mod positions;

pub use batched::CudaBatchBackend;
pub use context::{GpuContext, DISTANCE_TABLE_KERNEL, DISTANCE_TABLE_KERNEL_SRC};
pub use positions::DevicePositions;
