//! Distance/displacement table engine for one replica.
//!
//! Maintains, per particle pair, the accepted ("current") scalar distance
//! and displacement vector, and drives the three-state trial-move
//! protocol:
//!
//! ```text
//!            propose_move                accept_move
//!   Clean ─────────────────▶ TrialProposed ───────────▶ Clean
//!                                   │   reject_move_restoring_backup
//!                                   └──────────────────▶ Clean
//! ```
//!
//! Current distances are full padded rows; current displacements live in
//! the packed lower-triangular arena (columns `j < i`). The trial and
//! backup buffers each hold one row of `n_padded` entries per component.
//! The backup row is recomputed from scratch at proposal time so a
//! rejected move restores exact prior values with no floating-point
//! drift.
//!
//! At most one particle may have an outstanding trial/backup pair at any
//! time; violations fail fast (see `errors`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::align::aligned_size;
use crate::boundary::BoundaryDistance;
use crate::metrics::{MetricsSink, NullMetrics, ScopedTimer, TableOp};
use crate::neighbor::Neighbor;
use crate::positions::ParticlePositions;
use crate::store::{DisplRow, DisplRowMut, PackedTriangularStore};

/// Diagonal sentinel: never a legitimate self-distance.
pub const SENTINEL_DISTANCE: f64 = f64::MAX;

/// Consumer-facing table policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// When true, accepted moves always mirror the updated row into the
    /// column entries of every later row, keeping the stored pair data
    /// fresh in both directions. When false, consumers must only read
    /// the lower triangle (`j < i`), and accepted moves with
    /// `partial = true` skip the mirroring.
    pub need_full_table: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            need_full_table: true,
        }
    }
}

impl TableConfig {
    /// Lower-triangle-only regime: accepted moves may skip upper-triangle
    /// mirroring. Every consumer of this table must read `j < i` only.
    pub fn partial() -> Self {
        Self {
            need_full_table: false,
        }
    }
}

/// Pairwise distance/displacement table for a single replica.
pub struct DistanceTableEngine<const D: usize> {
    n: usize,
    n_padded: usize,
    config: TableConfig,
    boundary: Arc<dyn BoundaryDistance<D>>,
    metrics: Arc<dyn MetricsSink>,

    /// Current distances, one padded row per particle.
    distances: Vec<Vec<f64>>,
    /// Current displacements, packed lower triangle.
    displacements: PackedTriangularStore<D>,

    /// Trial distances from a proposed position (dimension buffers below).
    temp_r: Vec<f64>,
    temp_dr: Vec<f64>,
    /// Pre-move backup row, recomputed fresh at proposal time.
    old_r: Vec<f64>,
    old_dr: Vec<f64>,

    /// Particle owning the outstanding trial, if any.
    pending_trial: Option<usize>,
    /// Particle whose backup row is valid, if any.
    pending_backup: Option<usize>,
}

impl<const D: usize> DistanceTableEngine<D> {
    /// Creates an engine for `n` particles with a null metrics sink.
    pub fn new(n: usize, boundary: Arc<dyn BoundaryDistance<D>>, config: TableConfig) -> Self {
        Self::with_metrics(n, boundary, config, Arc::new(NullMetrics))
    }

    /// Creates an engine reporting timing events to `metrics`.
    pub fn with_metrics(
        n: usize,
        boundary: Arc<dyn BoundaryDistance<D>>,
        config: TableConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let mut engine = Self {
            n: 0,
            n_padded: 0,
            config,
            boundary,
            metrics,
            distances: Vec::new(),
            displacements: PackedTriangularStore::new(0),
            temp_r: Vec::new(),
            temp_dr: Vec::new(),
            old_r: Vec::new(),
            old_dr: Vec::new(),
            pending_trial: None,
            pending_backup: None,
        };
        engine.resize(n);
        engine
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Padded row length.
    pub fn padded_len(&self) -> usize {
        self.n_padded
    }

    /// Table policy this engine was constructed with.
    pub fn config(&self) -> TableConfig {
        self.config
    }

    /// The boundary-condition strategy shared with the batched path.
    pub fn boundary(&self) -> &Arc<dyn BoundaryDistance<D>> {
        &self.boundary
    }

    /// True while a proposed move awaits accept/reject.
    pub fn has_pending_trial(&self) -> bool {
        self.pending_trial.is_some()
    }

    /// Re-derives the padded size and reallocates all buffers.
    ///
    /// Not legal with a live trial/backup outstanding.
    pub fn resize(&mut self, n: usize) {
        assert!(
            self.pending_trial.is_none() && self.pending_backup.is_none(),
            "resize with an outstanding trial/backup state"
        );
        self.n = n;
        self.n_padded = aligned_size(n);
        self.distances = (0..n).map(|_| vec![0.0; self.n_padded]).collect();
        self.displacements.resize(n);
        self.temp_r = vec![0.0; self.n_padded];
        self.temp_dr = vec![0.0; D * self.n_padded];
        self.old_r = vec![0.0; self.n_padded];
        self.old_dr = vec![0.0; D * self.n_padded];
        log::debug!("distance table resized: n={} padded={}", n, self.n_padded);
    }

    /// Recomputes the entire table from scratch.
    ///
    /// Fills the lower-triangle displacement rows and full (symmetric)
    /// distance rows, and sets the diagonal sentinel. Idempotent for
    /// identical positions; leaves trial/backup state untouched.
    pub fn evaluate(&mut self, positions: &ParticlePositions<D>) {
        assert_eq!(positions.len(), self.n, "position count mismatch");
        let _timer = ScopedTimer::new(self.metrics.as_ref(), TableOp::Evaluate);

        for i in 0..self.n {
            let mut dr = self.displacements.row_mut(i);
            self.boundary.compute_distances(
                positions.get(i),
                positions,
                &mut self.distances[i],
                &mut dr,
                0,
                i,
                Some(i),
            );
        }
        // Upper distance triangle by symmetry; |p_i - p_j| and |p_j - p_i|
        // are bitwise equal, so this matches a direct recompute.
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                let v = self.distances[j][i];
                self.distances[i][j] = v;
            }
            self.distances[i][i] = SENTINEL_DISTANCE;
        }
    }

    /// Computes the trial pair relations for moving `active` to
    /// `candidate`; transitions Clean → TrialProposed.
    ///
    /// With `prepare_backup`, the pre-move row for `active` is also
    /// recomputed from scratch and tagged, enabling an exact restore on
    /// rejection. In the partial-table regime the fresh backup row is
    /// splice-copied into the current row so a later rejection never
    /// leaves that row undefined.
    pub fn propose_move(
        &mut self,
        positions: &ParticlePositions<D>,
        candidate: [f64; D],
        active: usize,
        prepare_backup: bool,
    ) {
        assert!(
            self.pending_trial.is_none(),
            "propose_move with a trial already outstanding for particle {:?}",
            self.pending_trial
        );
        assert!(active < self.n, "active index {} out of range", active);
        assert_eq!(positions.len(), self.n, "position count mismatch");
        let metrics = Arc::clone(&self.metrics);
        let _timer = ScopedTimer::new(metrics.as_ref(), TableOp::Move);

        {
            let mut dr = DisplRowMut::new(&mut self.temp_dr, 0, self.n_padded, self.n_padded);
            self.boundary.compute_distances(
                candidate,
                positions,
                &mut self.temp_r,
                &mut dr,
                0,
                self.n,
                Some(active),
            );
        }
        self.temp_r[active] = SENTINEL_DISTANCE;

        if prepare_backup {
            {
                let mut dr = DisplRowMut::new(&mut self.old_dr, 0, self.n_padded, self.n_padded);
                self.boundary.compute_distances(
                    positions.get(active),
                    positions,
                    &mut self.old_r,
                    &mut dr,
                    0,
                    self.n,
                    Some(active),
                );
            }
            self.old_r[active] = SENTINEL_DISTANCE;
            self.pending_backup = Some(active);

            // Without the full table, the current row may hold stale
            // values from earlier partial accepts; overwrite it now so a
            // rejected move leaves it defined.
            if !self.config.need_full_table {
                self.splice_backup_into_current(active);
            }
        } else {
            self.pending_backup = None;
        }
        self.pending_trial = Some(active);
    }

    /// Commits the outstanding trial for `active`; TrialProposed → Clean.
    ///
    /// Copies the trial row into the current row by whole cache lines
    /// (`aligned_size(active)` cells; the extra cells are never read).
    /// Unless `partial` is set in a lower-triangle-only table, the
    /// updated values are mirrored into column `active` of every later
    /// row with negated displacement.
    pub fn accept_move(&mut self, active: usize, partial: bool) {
        assert_eq!(
            self.pending_trial,
            Some(active),
            "accept_move without a matching trial"
        );
        let _timer = ScopedTimer::new(self.metrics.as_ref(), TableOp::Update);

        let nupdate = aligned_size(active).min(self.n_padded);
        self.distances[active][..nupdate].copy_from_slice(&self.temp_r[..nupdate]);
        {
            let mut row = self.displacements.row_mut(active);
            for dim in 0..D {
                row.component_mut(dim)[..nupdate]
                    .copy_from_slice(&self.temp_dr[dim * self.n_padded..][..nupdate]);
            }
        }

        if self.config.need_full_table || !partial {
            for i in (active + 1)..self.n {
                self.distances[i][active] = self.temp_r[i];
                let mut dr = [0.0; D];
                for (dim, v) in dr.iter_mut().enumerate() {
                    *v = -self.temp_dr[dim * self.n_padded + i];
                }
                self.displacements.row_mut(i).set(active, dr);
            }
        }

        self.pending_trial = None;
        self.pending_backup = None;
    }

    /// Rolls back the outstanding trial for `active` using the backup
    /// row; TrialProposed → Clean.
    ///
    /// The backup tag must match `active`; a mismatch is a programming
    /// error. Only the row copy is needed: no other row was touched by
    /// the proposal, and the column entries already hold exactly the
    /// pre-move values.
    pub fn reject_move_restoring_backup(&mut self, active: usize) {
        assert_eq!(
            self.pending_trial,
            Some(active),
            "reject without a matching trial"
        );
        assert_eq!(
            self.pending_backup,
            Some(active),
            "backup tag mismatch: backup was not prepared for particle {}",
            active
        );
        let _timer = ScopedTimer::new(self.metrics.as_ref(), TableOp::CopyOld);

        let nupdate = aligned_size(active).min(self.n_padded);
        self.distances[active][..nupdate].copy_from_slice(&self.old_r[..nupdate]);
        {
            let mut row = self.displacements.row_mut(active);
            for dim in 0..D {
                row.component_mut(dim)[..nupdate]
                    .copy_from_slice(&self.old_dr[dim * self.n_padded..][..nupdate]);
            }
        }

        self.pending_trial = None;
        self.pending_backup = None;
    }

    /// Closest other particle, scanning either the trial row or the
    /// current row for `active`.
    ///
    /// Stable left-to-right scan: the first index achieving the strict
    /// minimum wins. Returns `None` only when `n <= 1`.
    pub fn first_neighbor(&self, active: usize, use_trial: bool) -> Option<Neighbor<D>> {
        assert!(active < self.n, "active index {} out of range", active);
        if use_trial {
            assert!(
                self.pending_trial.is_some(),
                "trial row requested with no outstanding trial"
            );
        }

        let row: &[f64] = if use_trial {
            &self.temp_r[..self.n]
        } else {
            &self.distances[active][..self.n]
        };
        let mut min_dist = f64::INFINITY;
        let mut index = None;
        for (j, &r) in row.iter().enumerate() {
            if j != active && r < min_dist {
                min_dist = r;
                index = Some(j);
            }
        }
        let index = index?;

        let displacement = if use_trial {
            let mut dr = [0.0; D];
            for (dim, v) in dr.iter_mut().enumerate() {
                *v = self.temp_dr[dim * self.n_padded + index];
            }
            dr
        } else if index < active {
            self.displacements.row(active).at(index)
        } else {
            // Stored antisymmetrically in the lower triangle of row `index`.
            let mut dr = self.displacements.row(index).at(active);
            for v in dr.iter_mut() {
                *v = -*v;
            }
            dr
        };

        Some(Neighbor {
            index,
            distance: min_dist,
            displacement,
        })
    }

    /// Current distance row for particle `i` (padded; diagonal holds the
    /// sentinel).
    pub fn distance_row(&self, i: usize) -> &[f64] {
        &self.distances[i]
    }

    /// Current displacement row for particle `i` (lower triangle,
    /// columns `j < i`).
    pub fn displacement_row(&self, i: usize) -> DisplRow<'_, D> {
        self.displacements.row(i)
    }

    /// Trial distance row (valid only while a trial is outstanding).
    pub fn trial_distances(&self) -> &[f64] {
        &self.temp_r
    }

    /// Trial displacement row.
    pub fn trial_displacements(&self) -> DisplRow<'_, D> {
        DisplRow::new(&self.temp_dr, 0, self.n_padded, self.n_padded)
    }

    /// Backup distance row (valid only while a tagged backup is live).
    pub fn backup_distances(&self) -> &[f64] {
        &self.old_r
    }

    /// Backup displacement row.
    pub fn backup_displacements(&self) -> DisplRow<'_, D> {
        DisplRow::new(&self.old_dr, 0, self.n_padded, self.n_padded)
    }

    /// Installs trial/backup rows computed by the batched path and
    /// performs the same state transition as [`Self::propose_move`].
    ///
    /// `trial_stride` and `old_stride` are `(D + 1) * n_padded` strides
    /// from the cross-replica scratch buffer: the distance row followed
    /// by `D` displacement component rows.
    pub(crate) fn install_batched_trial(
        &mut self,
        trial_stride: &[f64],
        old_stride: Option<&[f64]>,
        active: usize,
    ) {
        assert!(
            self.pending_trial.is_none(),
            "batched propose with a trial already outstanding"
        );
        assert!(active < self.n, "active index {} out of range", active);
        let w = self.n_padded;

        self.temp_r.copy_from_slice(&trial_stride[..w]);
        self.temp_dr.copy_from_slice(&trial_stride[w..(D + 1) * w]);
        self.temp_r[active] = SENTINEL_DISTANCE;

        if let Some(old) = old_stride {
            self.old_r.copy_from_slice(&old[..w]);
            self.old_dr.copy_from_slice(&old[w..(D + 1) * w]);
            self.old_r[active] = SENTINEL_DISTANCE;
            self.pending_backup = Some(active);
            if !self.config.need_full_table {
                self.splice_backup_into_current(active);
            }
        } else {
            self.pending_backup = None;
        }
        self.pending_trial = Some(active);
    }

    /// Overwrites the current row for `active` with the fresh backup
    /// row, up to column `active`.
    fn splice_backup_into_current(&mut self, active: usize) {
        self.distances[active][..active].copy_from_slice(&self.old_r[..active]);
        if active > 0 {
            let mut row = self.displacements.row_mut(active);
            for dim in 0..D {
                row.component_mut(dim)[..active]
                    .copy_from_slice(&self.old_dr[dim * self.n_padded..][..active]);
            }
        }
    }
}
