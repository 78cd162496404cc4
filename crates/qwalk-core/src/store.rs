//! Padded, triangularly-packed displacement storage.
//!
//! One contiguous arena holds the lower-triangular displacement data for
//! all particle pairs. Row `i` stores entries for columns `j < i`, padded
//! up to an alignment boundary, and begins at the closed-form offset
//! [`packed_size`]`(i)` — no traversal, no per-row allocation. Rows are
//! lightweight (offset, length) handles into the arena, never
//! independently allocated.
//!
//! ## Layout
//!
//! The arena stores `D` component planes back to back: component `k` of
//! row `i` lives at `packed_size(i) + k * packed_size(N)`. A row view
//! therefore exposes `D` disjoint sub-slices with a fixed inter-component
//! stride of `packed_size(N)`.

use crate::align::{aligned_size, SIMD_ALIGNMENT};

/// Closed-form size of the packed lower triangle for `n` rows.
///
/// `packed_size(i)` for `i = 0..=n` is strictly increasing and partitions
/// the arena exactly: row `i` owns `[packed_size(i), packed_size(i+1))`,
/// a capacity of `aligned_size(i + 1)` scalars per component.
#[inline]
pub fn packed_size(n: usize) -> usize {
    let n_padded = aligned_size(n) as i64;
    let n = n as i64;
    let alignment = SIMD_ALIGNMENT as i64;
    ((n_padded * (2 * n - n_padded + 1) + (alignment - 1) * n_padded) / 2) as usize
}

/// Read-only view of one row's displacement components.
#[derive(Clone, Copy)]
pub struct DisplRow<'a, const D: usize> {
    pool: &'a [f64],
    offset: usize,
    len: usize,
    stride: usize,
}

impl<'a, const D: usize> DisplRow<'a, D> {
    /// Wraps a flat dimension-major buffer (`D` planes of `stride`
    /// scalars) as a row view of `len` entries.
    pub fn new(pool: &'a [f64], offset: usize, len: usize, stride: usize) -> Self {
        debug_assert!(offset + (D - 1) * stride + len <= pool.len());
        Self {
            pool,
            offset,
            len,
            stride,
        }
    }

    /// Number of addressable entries (includes alignment padding; entries
    /// at or beyond the row's logical length are stale).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Component `dim` of this row as a contiguous slice.
    pub fn component(&self, dim: usize) -> &'a [f64] {
        let start = self.offset + dim * self.stride;
        &self.pool[start..start + self.len]
    }

    /// Displacement vector stored at column `j`.
    pub fn at(&self, j: usize) -> [f64; D] {
        let mut out = [0.0; D];
        for (dim, v) in out.iter_mut().enumerate() {
            *v = self.component(dim)[j];
        }
        out
    }
}

/// Mutable view of one row's displacement components.
pub struct DisplRowMut<'a, const D: usize> {
    pool: &'a mut [f64],
    offset: usize,
    len: usize,
    stride: usize,
}

impl<'a, const D: usize> DisplRowMut<'a, D> {
    /// Mutable counterpart of [`DisplRow::new`].
    pub fn new(pool: &'a mut [f64], offset: usize, len: usize, stride: usize) -> Self {
        debug_assert!(offset + (D - 1) * stride + len <= pool.len());
        Self {
            pool,
            offset,
            len,
            stride,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Component `dim` of this row as a contiguous mutable slice.
    pub fn component_mut(&mut self, dim: usize) -> &mut [f64] {
        let start = self.offset + dim * self.stride;
        &mut self.pool[start..start + self.len]
    }

    /// Writes the displacement vector for column `j`.
    #[inline]
    pub fn set(&mut self, j: usize, dr: [f64; D]) {
        for (dim, v) in dr.iter().enumerate() {
            let start = self.offset + dim * self.stride;
            self.pool[start + j] = *v;
        }
    }

    /// Reborrows as a read-only view.
    pub fn as_ref(&self) -> DisplRow<'_, D> {
        DisplRow {
            pool: self.pool,
            offset: self.offset,
            len: self.len,
            stride: self.stride,
        }
    }
}

/// Arena owning the packed lower-triangular displacement data.
pub struct PackedTriangularStore<const D: usize> {
    n: usize,
    total_size: usize,
    pool: Vec<f64>,
}

impl<const D: usize> PackedTriangularStore<D> {
    /// Allocates storage for `n` rows.
    pub fn new(n: usize) -> Self {
        let mut store = Self {
            n: 0,
            total_size: 0,
            pool: Vec::new(),
        };
        store.resize(n);
        store
    }

    /// Re-derives offsets and reallocates the arena for `n` rows. The
    /// only operation that mutates size semantics after construction.
    pub fn resize(&mut self, n: usize) {
        self.n = n;
        self.total_size = packed_size(n);
        self.pool.clear();
        self.pool.resize(self.total_size * D, 0.0);
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.n
    }

    /// Per-component arena size (the inter-component stride).
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Padded capacity of row `i` per component.
    pub fn row_capacity(&self, i: usize) -> usize {
        packed_size(i + 1) - packed_size(i)
    }

    /// Read-only view of row `i` (capacity-length; columns `>= i` are
    /// alignment padding).
    pub fn row(&self, i: usize) -> DisplRow<'_, D> {
        assert!(i < self.n, "row index {} out of range (n = {})", i, self.n);
        DisplRow::new(&self.pool, packed_size(i), self.row_capacity(i), self.total_size)
    }

    /// Mutable view of row `i`.
    pub fn row_mut(&mut self, i: usize) -> DisplRowMut<'_, D> {
        assert!(i < self.n, "row index {} out of range (n = {})", i, self.n);
        let offset = packed_size(i);
        let cap = self.row_capacity(i);
        DisplRowMut::new(&mut self.pool, offset, cap, self.total_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_size_monotonic_and_partitions() {
        for n in [1usize, 2, 4, 7, 8, 9, 16, 33] {
            let mut prev = packed_size(0);
            assert_eq!(prev, 0);
            let mut cap_sum = 0;
            for i in 0..n {
                let next = packed_size(i + 1);
                assert!(next > prev, "packed_size not increasing at i={} n={}", i, n);
                cap_sum += aligned_size(i + 1);
                assert_eq!(next - prev, aligned_size(i + 1));
                prev = next;
            }
            assert_eq!(packed_size(n), cap_sum, "partition mismatch for n={}", n);
        }
    }

    #[test]
    fn test_row_views_are_disjoint() {
        let mut store: PackedTriangularStore<3> = PackedTriangularStore::new(12);
        // fill each row with a row-specific marker, then verify no overlap
        for i in 0..12 {
            let cap = store.row_capacity(i);
            let mut row = store.row_mut(i);
            for dim in 0..3 {
                for v in row.component_mut(dim).iter_mut() {
                    *v = (i * 10 + dim) as f64;
                }
            }
            assert_eq!(row.len(), cap);
        }
        for i in 0..12 {
            let row = store.row(i);
            for dim in 0..3 {
                assert!(row.component(dim).iter().all(|&v| v == (i * 10 + dim) as f64));
            }
        }
    }

    #[test]
    fn test_row_set_and_at() {
        let mut store: PackedTriangularStore<2> = PackedTriangularStore::new(5);
        store.row_mut(4).set(2, [1.5, -2.5]);
        assert_eq!(store.row(4).at(2), [1.5, -2.5]);
    }

    #[test]
    fn test_resize_rederives_layout() {
        let mut store: PackedTriangularStore<3> = PackedTriangularStore::new(4);
        assert_eq!(store.total_size(), packed_size(4));
        store.resize(9);
        assert_eq!(store.rows(), 9);
        assert_eq!(store.total_size(), packed_size(9));
        assert_eq!(store.row_capacity(8), aligned_size(9));
    }
}
