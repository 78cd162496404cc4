//! Batched cross-replica move proposal.
//!
//! [`BatchedMoveExecutor`] performs the `propose_move` computation for a
//! list of replicas ("walkers") sharing identical topology in one
//! dispatch. It owns a single flat scratch buffer holding the trial and
//! backup strides of every replica, hands the numerical work to a
//! [`BatchBackend`] (host-parallel here; CUDA offload in `qwalk-gpu`),
//! and then installs each replica's strides into its engine exactly the
//! way the non-batched path would — results are guaranteed identical to
//! calling `propose_move` once per replica sequentially.
//!
//! ## Scratch layout
//!
//! One stride per replica per state, `stride = n_padded * (D + 1)`
//! (distance row, then `D` displacement component rows). Trial strides
//! for all replicas come first, then the backup strides:
//!
//! ```text
//! [ trial w0 | trial w1 | ... | old w0 | old w1 | ... ]
//! ```
//!
//! Tasks indexed by (replica, chunk) write disjoint regions, so the
//! parallel section needs no synchronization; batch calls on one
//! executor must not overlap.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::boundary::BoundaryDistance;
use crate::errors::{QwalkError, Result};
use crate::metrics::{MetricsSink, NullMetrics, ScopedTimer, TableOp};
use crate::positions::{FusedNewPositions, ParticlePositions};
use crate::store::DisplRowMut;
use crate::table::DistanceTableEngine;

/// Particles per task: bounds the per-task working set on both backends
/// (one CUDA block / one host inner loop per chunk).
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Backend selection, decided at configuration time and dispatched by
/// [`BatchedMoveExecutor::from_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Rayon-parallel computation on the host.
    HostParallel,
    /// Accelerator offload (requires `qwalk-gpu`).
    CudaOffload,
}

/// Configuration for the batched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Source-particle chunk size per task.
    pub chunk_size: usize,
    /// Where the batched arithmetic runs.
    pub backend: BackendKind,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            backend: BackendKind::HostParallel,
        }
    }
}

/// Flat cross-replica trial/backup buffer.
pub struct BatchScratch<const D: usize> {
    nw: usize,
    n_padded: usize,
    buf: Vec<f64>,
}

impl<const D: usize> BatchScratch<D> {
    pub fn new() -> Self {
        Self {
            nw: 0,
            n_padded: 0,
            buf: Vec::new(),
        }
    }

    /// Per-replica per-state stride in scalars.
    pub fn stride(&self) -> usize {
        self.n_padded * (D + 1)
    }

    /// Number of replicas currently laid out.
    pub fn replicas(&self) -> usize {
        self.nw
    }

    /// Resizes for a batch of `nw` replicas with the given padded row
    /// length. Factor 2 covers the trial and backup halves.
    pub fn resize(&mut self, nw: usize, n_padded: usize) {
        self.nw = nw;
        self.n_padded = n_padded;
        let total = 2 * nw * self.stride();
        self.buf.clear();
        self.buf.resize(total, 0.0);
    }

    /// Trial stride of replica `iw`.
    pub fn trial_stride(&self, iw: usize) -> &[f64] {
        let s = self.stride();
        &self.buf[iw * s..(iw + 1) * s]
    }

    /// Backup stride of replica `iw`.
    pub fn old_stride(&self, iw: usize) -> &[f64] {
        let s = self.stride();
        let base = (self.nw + iw) * s;
        &self.buf[base..base + s]
    }

    /// Splits into the trial and backup halves for disjoint parallel
    /// writes.
    pub fn split_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        let mid = self.nw * self.stride();
        self.buf.split_at_mut(mid)
    }

    /// The whole flat buffer (device transfer target).
    pub fn as_flat_mut(&mut self) -> &mut [f64] {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<const D: usize> Default for BatchScratch<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a backend needs to fill the scratch buffer for one batch.
pub struct BatchRequest<'a, const D: usize> {
    pub boundary: &'a dyn BoundaryDistance<D>,
    /// Per-replica source positions (identical topology).
    pub positions: &'a [&'a ParticlePositions<D>],
    /// One proposed position per replica.
    pub new_positions: &'a FusedNewPositions<D>,
    /// Index of the moving particle (shared across the batch).
    pub active: usize,
    /// Whether backup strides must be filled as well.
    pub prepare_backup: bool,
    pub n: usize,
    pub n_padded: usize,
    pub chunk_size: usize,
}

/// Execution backend for the batched distance computation.
///
/// Implementations fill the scratch strides only; sentinels, splice
/// copies, and engine state transitions belong to the executor so every
/// backend shares them.
pub trait BatchBackend<const D: usize>: Send {
    fn name(&self) -> &'static str;

    fn compute_batch(
        &mut self,
        request: &BatchRequest<'_, D>,
        scratch: &mut BatchScratch<D>,
    ) -> Result<()>;
}

/// Rayon-parallel host backend; one task per replica, chunked inner
/// loops over source particles.
#[derive(Debug, Default)]
pub struct HostParallelBackend;

impl<const D: usize> BatchBackend<D> for HostParallelBackend {
    fn name(&self) -> &'static str {
        "host-parallel"
    }

    fn compute_batch(
        &mut self,
        request: &BatchRequest<'_, D>,
        scratch: &mut BatchScratch<D>,
    ) -> Result<()> {
        let stride = scratch.stride();
        let w = request.n_padded;
        let (trial_all, old_all) = scratch.split_mut();

        trial_all
            .par_chunks_mut(stride)
            .zip(old_all.par_chunks_mut(stride))
            .enumerate()
            .for_each(|(iw, (trial, old))| {
                let positions = request.positions[iw];
                let new_pos = request.new_positions.get(iw);
                let old_ref = positions.get(request.active);

                let mut first = 0;
                while first < request.n {
                    let last = (first + request.chunk_size).min(request.n);
                    {
                        let (r, dr_pool) = trial.split_at_mut(w);
                        let mut dr = DisplRowMut::new(dr_pool, 0, w, w);
                        request.boundary.compute_distances(
                            new_pos,
                            positions,
                            r,
                            &mut dr,
                            first,
                            last,
                            Some(request.active),
                        );
                    }
                    if request.prepare_backup {
                        let (r, dr_pool) = old.split_at_mut(w);
                        let mut dr = DisplRowMut::new(dr_pool, 0, w, w);
                        request.boundary.compute_distances(
                            old_ref,
                            positions,
                            r,
                            &mut dr,
                            first,
                            last,
                            Some(request.active),
                        );
                    }
                    first = last;
                }
            });

        Ok(())
    }
}

/// Orchestrates batched move proposals across replicas.
pub struct BatchedMoveExecutor<const D: usize> {
    config: BatchConfig,
    backend: Box<dyn BatchBackend<D>>,
    scratch: BatchScratch<D>,
    metrics: Arc<dyn MetricsSink>,
}

impl<const D: usize> std::fmt::Debug for BatchedMoveExecutor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedMoveExecutor")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl<const D: usize> BatchedMoveExecutor<D> {
    /// Executor backed by the rayon host backend.
    pub fn host_parallel(config: BatchConfig) -> Self {
        Self::with_backend(config, Box::new(HostParallelBackend))
    }

    /// Executor built from configuration alone.
    ///
    /// Only the host backend can be constructed here. `CudaOffload`
    /// needs a live device context, so that backend is built in
    /// `qwalk-gpu` and handed over through [`Self::with_backend`];
    /// requesting it from configuration is an error rather than a
    /// silent host fallback.
    pub fn from_config(config: BatchConfig) -> Result<Self> {
        match config.backend {
            BackendKind::HostParallel => Ok(Self::host_parallel(config)),
            BackendKind::CudaOffload => Err(QwalkError::config(
                "CudaOffload backend requires a GPU context; construct \
                 qwalk-gpu's CudaBatchBackend and pass it to with_backend",
            )),
        }
    }

    /// Executor with an explicit backend (e.g. the CUDA backend from
    /// `qwalk-gpu`).
    pub fn with_backend(config: BatchConfig, backend: Box<dyn BatchBackend<D>>) -> Self {
        Self {
            config,
            backend,
            scratch: BatchScratch::new(),
            metrics: Arc::new(NullMetrics),
        }
    }

    /// Replaces the metrics sink.
    pub fn set_metrics(&mut self, metrics: Arc<dyn MetricsSink>) {
        self.metrics = metrics;
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Performs `propose_move` for every replica in one dispatch.
    ///
    /// All replicas must share the leader's topology; a mismatch is a
    /// configuration error. After this call each engine is in the
    /// TrialProposed state exactly as if `propose_move(positions[iw],
    /// new_positions[iw], active, prepare_backup)` had been called on it.
    pub fn propose_move_batched(
        &mut self,
        engines: &mut [DistanceTableEngine<D>],
        positions: &[&ParticlePositions<D>],
        new_positions: &FusedNewPositions<D>,
        active: usize,
        prepare_backup: bool,
    ) -> Result<()> {
        let nw = engines.len();
        if nw == 0 {
            return Ok(());
        }
        if positions.len() != nw || new_positions.len() != nw {
            return Err(QwalkError::config(format!(
                "batch size mismatch: {} engines, {} position sets, {} proposed positions",
                nw,
                positions.len(),
                new_positions.len()
            )));
        }

        let n = engines[0].len();
        let n_padded = engines[0].padded_len();
        for (iw, engine) in engines.iter().enumerate() {
            if engine.len() != n {
                return Err(QwalkError::config(format!(
                    "replica {} has {} particles, leader has {}",
                    iw,
                    engine.len(),
                    n
                )));
            }
            if positions[iw].len() != n {
                return Err(QwalkError::config(format!(
                    "replica {} position source has {} particles, leader has {}",
                    iw,
                    positions[iw].len(),
                    n
                )));
            }
            assert!(
                !engine.has_pending_trial(),
                "batched propose with a trial already outstanding on replica {}",
                iw
            );
        }
        assert!(active < n, "active index {} out of range", active);

        // The leader's strategy serves the whole batch.
        let boundary = engines[0].boundary().clone();
        self.scratch.resize(nw, n_padded);

        log::debug!(
            "batched propose: nw={} n={} active={} backup={} backend={}",
            nw,
            n,
            active,
            prepare_backup,
            self.backend.name()
        );

        {
            let request = BatchRequest {
                boundary: boundary.as_ref(),
                positions,
                new_positions,
                active,
                prepare_backup,
                n,
                n_padded,
                chunk_size: self.config.chunk_size.max(1),
            };
            let _timer = ScopedTimer::new(self.metrics.as_ref(), TableOp::Offload);
            self.backend.compute_batch(&request, &mut self.scratch)?;
        }

        for (iw, engine) in engines.iter_mut().enumerate() {
            let old = prepare_backup.then(|| self.scratch.old_stride(iw));
            engine.install_batched_trial(self.scratch.trial_stride(iw), old, active);
        }
        Ok(())
    }
}
