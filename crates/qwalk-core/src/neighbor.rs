//! Nearest-neighbor queries over table state.
//!
//! Pure read-only layering on [`DistanceTableEngine`]; no invariants of
//! its own beyond the engine's.

use crate::table::DistanceTableEngine;

/// Result of a closest-other-particle query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<const D: usize> {
    /// Index of the closest other particle.
    pub index: usize,
    /// Scalar distance to it.
    pub distance: f64,
    /// Displacement vector toward it (neighbor minus query position).
    pub displacement: [f64; D],
}

/// Read-only view answering "closest other particle" against either the
/// current or the trial state.
pub struct NearestNeighborQuery<'a, const D: usize> {
    engine: &'a DistanceTableEngine<D>,
}

impl<'a, const D: usize> NearestNeighborQuery<'a, D> {
    pub fn new(engine: &'a DistanceTableEngine<D>) -> Self {
        Self { engine }
    }

    /// Closest other particle in the accepted table state.
    pub fn current(&self, active: usize) -> Option<Neighbor<D>> {
        self.engine.first_neighbor(active, false)
    }

    /// Closest other particle as seen from the outstanding trial
    /// position of `active`.
    pub fn trial(&self, active: usize) -> Option<Neighbor<D>> {
        self.engine.first_neighbor(active, true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::boundary::OpenBoundary;
    use crate::positions::ParticlePositions;
    use crate::table::TableConfig;

    #[test]
    fn test_query_delegates_to_engine() {
        let positions = ParticlePositions::from_rows(&[[0.0, 0.0], [2.0, 0.0], [5.0, 0.0]]);
        let mut engine: DistanceTableEngine<2> =
            DistanceTableEngine::new(3, Arc::new(OpenBoundary), TableConfig::default());
        engine.evaluate(&positions);

        let query = NearestNeighborQuery::new(&engine);
        let nb = query.current(2).unwrap();
        assert_eq!(nb.index, 1);
        assert_eq!(nb.distance, 3.0);
        assert_eq!(nb.displacement, [-3.0, 0.0]);
    }
}
