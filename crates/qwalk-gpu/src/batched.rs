//! CUDA offload backend for the batched move proposal.
//!
//! Implements [`BatchBackend`] by mirroring each replica's positions on
//! the device, building a device pointer table over the mirrors, and
//! launching one 2D grid (source chunks x replicas) that fills the flat
//! trial/backup buffer in a single dispatch. Sentinels, splice copies,
//! and engine state transitions stay in the executor, so swapping this
//! backend for the host one changes only where the arithmetic runs.
//!
//! The kernel evaluates the same formulas as the host boundary
//! strategies in the same per-dimension order; only fused multiply-add
//! contraction on the device can shift results in the last ulp.

use std::sync::Arc;

use anyhow::Context as _;
use cudarc::driver::{
    CudaFunction, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use qwalk_core::{BatchBackend, BatchRequest, BatchScratch, BoundaryKind, QwalkError};

use crate::context::{GpuContext, DISTANCE_TABLE_KERNEL};
use crate::positions::DevicePositions;

/// Accelerator backend for [`qwalk_core::BatchedMoveExecutor`].
///
/// Holds per-replica position mirrors and transfer buffers across
/// batches; buffers are reallocated only when the batch shape changes.
pub struct CudaBatchBackend<const D: usize> {
    stream: Arc<CudaStream>,
    kernel: CudaFunction,
    positions: Vec<DevicePositions<D>>,
    d_ptr_table: CudaSlice<u64>,
    d_new_pos: CudaSlice<f64>,
    d_box: CudaSlice<f64>,
    d_scratch: CudaSlice<f64>,
}

impl<const D: usize> CudaBatchBackend<D> {
    /// Builds a backend on the context's default stream.
    pub fn new(gpu: &GpuContext) -> anyhow::Result<Self> {
        let stream = gpu.stream().clone();
        let kernel = gpu
            .module()
            .load_function(DISTANCE_TABLE_KERNEL)
            .with_context(|| format!("Failed to load kernel '{}'", DISTANCE_TABLE_KERNEL))?;

        let d_ptr_table = stream.alloc_zeros::<u64>(1)?;
        let d_new_pos = stream.alloc_zeros::<f64>(1)?;
        let d_box = stream.alloc_zeros::<f64>(D.max(1))?;
        let d_scratch = stream.alloc_zeros::<f64>(1)?;

        Ok(Self {
            stream,
            kernel,
            positions: Vec::new(),
            d_ptr_table,
            d_new_pos,
            d_box,
            d_scratch,
        })
    }

    fn run(
        &mut self,
        request: &BatchRequest<'_, D>,
        scratch: &mut BatchScratch<D>,
    ) -> anyhow::Result<()> {
        let nw = request.positions.len();
        let n = request.n;
        let n_padded = request.n_padded;

        // Refresh the per-replica mirrors, reallocating only on shape
        // changes.
        self.positions.truncate(nw);
        for (iw, source) in request.positions.iter().enumerate() {
            let stale = self
                .positions
                .get(iw)
                .map_or(true, |m| m.len() != source.len() || m.padded_len() != source.padded_len());
            if stale {
                let mirror = DevicePositions::new(&self.stream, source.len())?;
                if iw < self.positions.len() {
                    self.positions[iw] = mirror;
                } else {
                    self.positions.push(mirror);
                }
            }
            self.positions[iw].upload(&self.stream, source)?;
        }

        // Device pointer table over the mirrors.
        let table: Vec<u64> = self
            .positions
            .iter()
            .map(|m| m.device_addr(&self.stream))
            .collect();
        if self.d_ptr_table.len() != nw {
            self.d_ptr_table = self.stream.alloc_zeros::<u64>(nw.max(1))?;
        }
        self.stream.memcpy_htod(&table, &mut self.d_ptr_table)?;

        // Fused proposals and cell parameters.
        let new_flat = request.new_positions.as_flat();
        if self.d_new_pos.len() != new_flat.len() {
            self.d_new_pos = self.stream.alloc_zeros::<f64>(new_flat.len().max(1))?;
        }
        self.stream.memcpy_htod(new_flat, &mut self.d_new_pos)?;

        let descriptor = request.boundary.descriptor();
        let boundary_kind: i32 = match descriptor.kind {
            BoundaryKind::Open => 0,
            BoundaryKind::Periodic => 1,
        };
        let box_lengths: Vec<f64> = descriptor.box_lengths.to_vec();
        if !box_lengths.is_empty() {
            self.stream.memcpy_htod(&box_lengths, &mut self.d_box)?;
        }

        // Flat output buffer; zeroed each batch so the padded tails and
        // an unused backup half read back the same as the host path.
        if self.d_scratch.len() != scratch.len() {
            self.d_scratch = self.stream.alloc_zeros::<f64>(scratch.len().max(1))?;
        } else {
            self.stream.memset_zeros(&mut self.d_scratch)?;
        }

        let block = request.chunk_size.clamp(1, 1024) as u32;
        let grid_x = (n as u32).div_ceil(block).max(1);
        let cfg = LaunchConfig {
            grid_dim: (grid_x, nw as u32, 1),
            block_dim: (block, 1, 1),
            shared_mem_bytes: 0,
        };

        let nw_i = nw as i32;
        let n_i = n as i32;
        let n_padded_i = n_padded as i32;
        let d_i = D as i32;
        let active_i = request.active as i32;
        let prepare_old_i = request.prepare_backup as i32;
        let new_pos_stride_i = request.new_positions.stride() as i32;

        log::debug!(
            "CUDA batched propose: nw={} n={} grid=({}, {}) block={}",
            nw,
            n,
            grid_x,
            nw,
            block
        );

        unsafe {
            let mut builder = self.stream.launch_builder(&self.kernel);
            builder.arg(&self.d_ptr_table);
            builder.arg(&self.d_scratch);
            builder.arg(&self.d_new_pos);
            builder.arg(&self.d_box);
            builder.arg(&boundary_kind);
            builder.arg(&nw_i);
            builder.arg(&n_i);
            builder.arg(&n_padded_i);
            builder.arg(&d_i);
            builder.arg(&active_i);
            builder.arg(&prepare_old_i);
            builder.arg(&new_pos_stride_i);
            builder.launch(cfg)?;
        }

        self.stream
            .memcpy_dtoh(&self.d_scratch, scratch.as_flat_mut())?;
        self.stream.synchronize()?;
        Ok(())
    }
}

impl<const D: usize> BatchBackend<D> for CudaBatchBackend<D> {
    fn name(&self) -> &'static str {
        "cuda-offload"
    }

    fn compute_batch(
        &mut self,
        request: &BatchRequest<'_, D>,
        scratch: &mut BatchScratch<D>,
    ) -> qwalk_core::Result<()> {
        self.run(request, scratch)
            .map_err(|e| QwalkError::device("batched distance offload", format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwalk_core::{
        BatchConfig, BatchedMoveExecutor, DistanceTableEngine, FusedNewPositions, OpenBoundary,
        ParticlePositions, PeriodicBoundary, TableConfig,
    };

    fn replica_rows(iw: usize, n: usize) -> Vec<[f64; 3]> {
        (0..n)
            .map(|i| {
                let t = (i + 7 * iw) as f64;
                [t * 0.53 - 2.0, (t * 0.29).cos() * 3.0, t * 0.11]
            })
            .collect()
    }

    fn assert_rows_close(a: &[f64], b: &[f64]) {
        for (x, y) in a.iter().zip(b) {
            assert!(
                (x - y).abs() <= 1e-12 * x.abs().max(1.0),
                "{} vs {}",
                x,
                y
            );
        }
    }

    #[test]
    #[ignore] // Requires GPU hardware
    fn test_cuda_backend_matches_host_backend() {
        env_logger::builder().is_test(true).try_init().ok();
        if !GpuContext::is_available() {
            return;
        }

        let gpu = GpuContext::new(0, None).unwrap();
        let n = 37;
        let nw = 4;
        let active = 11;
        let proposals: Vec<[f64; 3]> = (0..nw)
            .map(|iw| [iw as f64 * 0.4, 1.0 - iw as f64, 0.25])
            .collect();

        let build = || {
            let mut engines = Vec::new();
            let mut position_sets = Vec::new();
            for iw in 0..nw {
                let rows = replica_rows(iw, n);
                let positions = ParticlePositions::<3>::from_rows(&rows);
                let mut engine = DistanceTableEngine::new(
                    n,
                    std::sync::Arc::new(OpenBoundary),
                    TableConfig::default(),
                );
                engine.evaluate(&positions);
                engines.push(engine);
                position_sets.push(positions);
            }
            (engines, position_sets)
        };

        let (mut gpu_engines, gpu_positions) = build();
        let (mut host_engines, host_positions) = build();

        let fused = FusedNewPositions::from_rows(&proposals);
        let backend = CudaBatchBackend::<3>::new(&gpu).unwrap();
        let mut gpu_executor =
            BatchedMoveExecutor::with_backend(BatchConfig::default(), Box::new(backend));
        let mut host_executor = BatchedMoveExecutor::host_parallel(BatchConfig::default());

        let gpu_refs: Vec<&ParticlePositions<3>> = gpu_positions.iter().collect();
        let host_refs: Vec<&ParticlePositions<3>> = host_positions.iter().collect();
        gpu_executor
            .propose_move_batched(&mut gpu_engines, &gpu_refs, &fused, active, true)
            .unwrap();
        host_executor
            .propose_move_batched(&mut host_engines, &host_refs, &fused, active, true)
            .unwrap();

        for iw in 0..nw {
            assert_rows_close(
                &gpu_engines[iw].trial_distances()[..n],
                &host_engines[iw].trial_distances()[..n],
            );
            assert_rows_close(
                &gpu_engines[iw].backup_distances()[..n],
                &host_engines[iw].backup_distances()[..n],
            );
        }
    }

    #[test]
    #[ignore] // Requires GPU hardware
    fn test_cuda_backend_periodic_minimum_image() {
        if !GpuContext::is_available() {
            return;
        }

        let gpu = GpuContext::new(0, None).unwrap();
        let boundary = PeriodicBoundary::new([10.0, 10.0, 10.0]).unwrap();
        let rows = vec![[0.5, 0.0, 0.0], [9.5, 0.0, 0.0], [5.0, 5.0, 5.0]];
        let positions = ParticlePositions::<3>::from_rows(&rows);
        let mut engine =
            DistanceTableEngine::new(3, std::sync::Arc::new(boundary), TableConfig::default());
        engine.evaluate(&positions);

        let backend = CudaBatchBackend::<3>::new(&gpu).unwrap();
        let mut executor =
            BatchedMoveExecutor::with_backend(BatchConfig::default(), Box::new(backend));
        let fused = FusedNewPositions::from_rows(&[[0.5, 0.0, 0.0]]);
        executor
            .propose_move_batched(
                std::slice::from_mut(&mut engine),
                &[&positions],
                &fused,
                0,
                false,
            )
            .unwrap();

        // particle 1 wraps across the cell to distance 1.0
        assert!((engine.trial_distances()[1] - 1.0).abs() < 1e-12);
    }
}
