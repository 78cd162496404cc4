//! Boundary-condition distance strategies.
//!
//! The table engine is agnostic to the simulation cell geometry; it
//! consumes a [`BoundaryDistance`] strategy that fills scalar distances
//! and displacement vectors for a reference position against a range of
//! candidate particles. Two host implementations are provided: open
//! (Euclidean) and orthorhombic periodic (minimum image). The offload
//! kernel evaluates the same formulas from the strategy's
//! [`BoundaryDescriptor`]; host/device parity is a correctness
//! requirement, not just a performance one.
//!
//! Displacement convention: `dr[j] = p[j] - reference`.

use serde::{Deserialize, Serialize};

use crate::errors::{QwalkError, Result};
use crate::positions::ParticlePositions;
use crate::store::DisplRowMut;

/// Geometry family, used to select the matching device kernel path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// No wrapping; plain Euclidean distances.
    Open,
    /// Orthorhombic periodic cell with minimum-image convention.
    Periodic,
}

/// Plain-data description of a strategy, sufficient to reproduce its
/// formula on the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "[f64; D]: Serialize",
    deserialize = "[f64; D]: Deserialize<'de>"
))]
pub struct BoundaryDescriptor<const D: usize> {
    pub kind: BoundaryKind,
    /// Cell edge lengths; all zero for open boundaries.
    pub box_lengths: [f64; D],
}

/// Pluggable boundary-condition distance formula.
pub trait BoundaryDistance<const D: usize>: Send + Sync {
    /// Fills `out_r[j]` and `out_dr[j]` for every `j` in `first..last`
    /// with the distance and displacement from `reference` to particle
    /// `j`. Both outputs are indexed absolutely (they must cover
    /// `0..last`). `exclude` marks the active particle; implementations
    /// may skip or compute it — the engine overwrites that entry with
    /// the diagonal sentinel either way.
    fn compute_distances(
        &self,
        reference: [f64; D],
        positions: &ParticlePositions<D>,
        out_r: &mut [f64],
        out_dr: &mut DisplRowMut<'_, D>,
        first: usize,
        last: usize,
        exclude: Option<usize>,
    );

    /// Single-pair distance/displacement (`b` relative to `a`).
    fn displacement(&self, a: [f64; D], b: [f64; D]) -> ([f64; D], f64);

    /// Plain-data descriptor for device-side evaluation of the same
    /// formula.
    fn descriptor(&self) -> BoundaryDescriptor<D>;
}

/// Open (non-periodic) geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenBoundary;

impl<const D: usize> BoundaryDistance<D> for OpenBoundary {
    fn compute_distances(
        &self,
        reference: [f64; D],
        positions: &ParticlePositions<D>,
        out_r: &mut [f64],
        out_dr: &mut DisplRowMut<'_, D>,
        first: usize,
        last: usize,
        _exclude: Option<usize>,
    ) {
        for j in first..last {
            let (dr, r) = self.displacement(reference, positions.get(j));
            out_r[j] = r;
            out_dr.set(j, dr);
        }
    }

    #[inline]
    fn displacement(&self, a: [f64; D], b: [f64; D]) -> ([f64; D], f64) {
        let mut dr = [0.0; D];
        let mut r2 = 0.0;
        for dim in 0..D {
            dr[dim] = b[dim] - a[dim];
            r2 += dr[dim] * dr[dim];
        }
        (dr, r2.sqrt())
    }

    fn descriptor(&self) -> BoundaryDescriptor<D> {
        BoundaryDescriptor {
            kind: BoundaryKind::Open,
            box_lengths: [0.0; D],
        }
    }
}

/// Orthorhombic periodic geometry with minimum-image wrapping.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicBoundary<const D: usize> {
    box_lengths: [f64; D],
}

impl<const D: usize> PeriodicBoundary<D> {
    /// Validates the cell: every edge length must be strictly positive.
    pub fn new(box_lengths: [f64; D]) -> Result<Self> {
        if box_lengths.iter().any(|&l| !(l > 0.0)) {
            return Err(QwalkError::config(format!(
                "periodic cell requires positive edge lengths, got {:?}",
                box_lengths
            )));
        }
        Ok(Self { box_lengths })
    }

    pub fn box_lengths(&self) -> [f64; D] {
        self.box_lengths
    }
}

impl<const D: usize> BoundaryDistance<D> for PeriodicBoundary<D> {
    fn compute_distances(
        &self,
        reference: [f64; D],
        positions: &ParticlePositions<D>,
        out_r: &mut [f64],
        out_dr: &mut DisplRowMut<'_, D>,
        first: usize,
        last: usize,
        _exclude: Option<usize>,
    ) {
        for j in first..last {
            let (dr, r) = self.displacement(reference, positions.get(j));
            out_r[j] = r;
            out_dr.set(j, dr);
        }
    }

    #[inline]
    fn displacement(&self, a: [f64; D], b: [f64; D]) -> ([f64; D], f64) {
        let mut dr = [0.0; D];
        let mut r2 = 0.0;
        for dim in 0..D {
            let l = self.box_lengths[dim];
            let mut d = b[dim] - a[dim];
            // minimum image; round() matches the device kernel's round()
            d -= l * (d / l).round();
            dr[dim] = d;
            r2 += d * d;
        }
        (dr, r2.sqrt())
    }

    fn descriptor(&self) -> BoundaryDescriptor<D> {
        BoundaryDescriptor {
            kind: BoundaryKind::Periodic,
            box_lengths: self.box_lengths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_buffer<const D: usize>(n: usize) -> Vec<f64> {
        vec![0.0; D * n]
    }

    #[test]
    fn test_open_boundary_distances() {
        let positions: ParticlePositions<2> =
            ParticlePositions::from_rows(&[[0.0, 0.0], [3.0, 4.0], [1.0, 0.0]]);
        let mut out_r = vec![0.0; 3];
        let mut pool = row_buffer::<2>(3);
        let mut out_dr = DisplRowMut::new(&mut pool, 0, 3, 3);
        let boundary = OpenBoundary;
        BoundaryDistance::<2>::compute_distances(
            &boundary,
            [0.0, 0.0],
            &positions,
            &mut out_r,
            &mut out_dr,
            0,
            3,
            Some(0),
        );
        assert_eq!(out_r[1], 5.0);
        assert_eq!(out_dr.as_ref().at(1), [3.0, 4.0]);
        assert_eq!(out_r[2], 1.0);
    }

    #[test]
    fn test_periodic_minimum_image() {
        let boundary: PeriodicBoundary<3> = PeriodicBoundary::new([10.0, 10.0, 10.0]).unwrap();
        // 9.0 apart in x wraps to -1.0
        let (dr, r) = boundary.displacement([0.5, 0.0, 0.0], [9.5, 0.0, 0.0]);
        assert!((r - 1.0).abs() < 1e-12);
        assert!((dr[0] - (-1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_periodic_rejects_degenerate_cell() {
        assert!(PeriodicBoundary::<2>::new([10.0, 0.0]).is_err());
        assert!(PeriodicBoundary::<2>::new([10.0, -1.0]).is_err());
        assert!(PeriodicBoundary::<2>::new([10.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_descriptors() {
        let open = OpenBoundary;
        let d = BoundaryDistance::<3>::descriptor(&open);
        assert_eq!(d.kind, BoundaryKind::Open);

        let periodic: PeriodicBoundary<3> = PeriodicBoundary::new([4.0, 5.0, 6.0]).unwrap();
        let d = periodic.descriptor();
        assert_eq!(d.kind, BoundaryKind::Periodic);
        assert_eq!(d.box_lengths, [4.0, 5.0, 6.0]);
    }
}
