//! Device-resident mirrors of per-replica position buffers.

use std::sync::Arc;

use anyhow::{Context, Result};
use cudarc::driver::{CudaSlice, CudaStream, DevicePtr};
use qwalk_core::{aligned_size, ParticlePositions};

/// One replica's dimension-major position buffer on the device.
///
/// Layout matches [`ParticlePositions::as_flat`] exactly: component `k`
/// occupies `[k * n_padded, (k + 1) * n_padded)`, so uploads are a
/// single contiguous copy and the kernel indexes it the same way the
/// host does.
pub struct DevicePositions<const D: usize> {
    n: usize,
    n_padded: usize,
    buf: CudaSlice<f64>,
}

impl<const D: usize> DevicePositions<D> {
    /// Allocates a zeroed mirror for `n` particles.
    pub fn new(stream: &Arc<CudaStream>, n: usize) -> Result<Self> {
        let n_padded = aligned_size(n);
        let buf = stream
            .alloc_zeros::<f64>((D * n_padded).max(1))
            .context("Failed to allocate device position mirror")?;
        Ok(Self { n, n_padded, buf })
    }

    /// Copies the host buffer into the mirror. The layouts must match;
    /// a size change requires a fresh mirror.
    pub fn upload(
        &mut self,
        stream: &Arc<CudaStream>,
        positions: &ParticlePositions<D>,
    ) -> Result<()> {
        anyhow::ensure!(
            positions.len() == self.n && positions.padded_len() == self.n_padded,
            "position layout mismatch: mirror holds {} particles (padded {}), source has {} (padded {})",
            self.n,
            self.n_padded,
            positions.len(),
            positions.padded_len()
        );
        stream
            .memcpy_htod(positions.as_flat(), &mut self.buf)
            .context("Failed to upload positions to device")?;
        Ok(())
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Padded row length (multiple of the SIMD alignment).
    pub fn padded_len(&self) -> usize {
        self.n_padded
    }

    /// Raw device address, for the batched kernel's pointer table.
    pub fn device_addr(&self, stream: &Arc<CudaStream>) -> u64 {
        let (ptr, _sync) = self.buf.device_ptr(stream);
        ptr as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GpuContext;

    #[test]
    #[ignore] // Requires GPU hardware
    fn test_upload_rejects_layout_mismatch() {
        if !GpuContext::is_available() {
            return;
        }
        let gpu = GpuContext::new(0, None).unwrap();
        let mut mirror: DevicePositions<3> = DevicePositions::new(gpu.stream(), 5).unwrap();
        assert_eq!(mirror.len(), 5);
        assert_eq!(mirror.padded_len(), 8);

        let ok = ParticlePositions::<3>::new(5);
        mirror.upload(gpu.stream(), &ok).unwrap();

        let wrong = ParticlePositions::<3>::new(9);
        assert!(mirror.upload(gpu.stream(), &wrong).is_err());
    }
}
