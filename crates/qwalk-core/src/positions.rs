//! Structure-of-arrays particle position containers.
//!
//! The distance kernels read one coordinate component across all
//! particles at a time, so positions are stored dimension-major with
//! rows padded to the SIMD alignment boundary. The batched path also
//! uses a fused buffer holding one proposed position per replica with a
//! known stride, so a single host/device transfer covers the whole
//! batch.

use crate::align::aligned_size;

/// Padded SoA position container for one replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticlePositions<const D: usize> {
    n: usize,
    n_padded: usize,
    /// Dimension-major: component `k` occupies `[k * n_padded, (k+1) * n_padded)`.
    soa: Vec<f64>,
}

impl<const D: usize> ParticlePositions<D> {
    /// Allocates zeroed positions for `n` particles.
    pub fn new(n: usize) -> Self {
        let n_padded = aligned_size(n);
        Self {
            n,
            n_padded,
            soa: vec![0.0; D * n_padded],
        }
    }

    /// Builds a container from AoS rows.
    pub fn from_rows(rows: &[[f64; D]]) -> Self {
        let mut positions = Self::new(rows.len());
        for (i, row) in rows.iter().enumerate() {
            positions.set(i, *row);
        }
        positions
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

    /// Position of particle `i`.
    #[inline]
    pub fn get(&self, i: usize) -> [f64; D] {
        debug_assert!(i < self.n);
        let mut out = [0.0; D];
        for (dim, v) in out.iter_mut().enumerate() {
            *v = self.soa[dim * self.n_padded + i];
        }
        out
    }

    /// Overwrites the position of particle `i`.
    #[inline]
    pub fn set(&mut self, i: usize, pos: [f64; D]) {
        assert!(i < self.n, "particle index {} out of range (n = {})", i, self.n);
        for (dim, v) in pos.iter().enumerate() {
            self.soa[dim * self.n_padded + i] = *v;
        }
    }

    /// Component `dim` across all particles (padded tail is zero).
    pub fn component(&self, dim: usize) -> &[f64] {
        &self.soa[dim * self.n_padded..(dim + 1) * self.n_padded]
    }

    /// The full dimension-major buffer (for device upload).
    pub fn as_flat(&self) -> &[f64] {
        &self.soa
    }
}

/// One proposed position per replica, stored dimension-major with a
/// `num_replicas` stride so the whole batch moves in one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedNewPositions<const D: usize> {
    nw: usize,
    soa: Vec<f64>,
}

impl<const D: usize> FusedNewPositions<D> {
    /// Builds the fused buffer from one proposed position per replica.
    pub fn from_rows(rows: &[[f64; D]]) -> Self {
        let nw = rows.len();
        let mut soa = vec![0.0; D * nw];
        for (iw, row) in rows.iter().enumerate() {
            for (dim, v) in row.iter().enumerate() {
                soa[dim * nw + iw] = *v;
            }
        }
        Self { nw, soa }
    }

    /// Number of replicas covered by this buffer.
    pub fn len(&self) -> usize {
        self.nw
    }

    pub fn is_empty(&self) -> bool {
        self.nw == 0
    }

    /// Inter-component stride (equals the replica count).
    pub fn stride(&self) -> usize {
        self.nw
    }

    /// Proposed position for replica `iw`.
    #[inline]
    pub fn get(&self, iw: usize) -> [f64; D] {
        debug_assert!(iw < self.nw);
        let mut out = [0.0; D];
        for (dim, v) in out.iter_mut().enumerate() {
            *v = self.soa[dim * self.nw + iw];
        }
        out
    }

    /// The full dimension-major buffer (for device upload).
    pub fn as_flat(&self) -> &[f64] {
        &self.soa
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soa_roundtrip() {
        let mut p: ParticlePositions<3> = ParticlePositions::new(5);
        p.set(0, [1.0, 2.0, 3.0]);
        p.set(4, [-1.0, 0.5, 9.0]);
        assert_eq!(p.get(0), [1.0, 2.0, 3.0]);
        assert_eq!(p.get(4), [-1.0, 0.5, 9.0]);
        assert_eq!(p.len(), 5);
        assert_eq!(p.padded_len(), 8);
        assert_eq!(p.component(2)[4], 9.0);
    }

    #[test]
    fn test_fused_new_positions_layout() {
        let fused: FusedNewPositions<2> = FusedNewPositions::from_rows(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused.get(0), [1.0, 2.0]);
        assert_eq!(fused.get(1), [3.0, 4.0]);
        // dimension-major: x0 x1 y0 y1
        assert_eq!(fused.as_flat(), &[1.0, 3.0, 2.0, 4.0]);
    }
}
