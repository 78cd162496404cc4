//! SIMD/cache alignment math shared by the table storage layouts.
//!
//! All per-row buffers are padded to a multiple of [`SIMD_ALIGNMENT`]
//! scalars so row copies move whole cache lines and vectorized distance
//! loops never need a scalar tail within a row.

/// Number of f64 lanes per alignment boundary (one 64-byte cache line).
pub const SIMD_ALIGNMENT: usize = 8;

/// Rounds `n` up to the next multiple of [`SIMD_ALIGNMENT`].
///
/// `aligned_size(0) == 0`; otherwise the result is the padded row length
/// used for every distance/displacement row in the engine.
#[inline]
pub fn aligned_size(n: usize) -> usize {
    n.div_ceil(SIMD_ALIGNMENT) * SIMD_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 8);
        assert_eq!(aligned_size(7), 8);
        assert_eq!(aligned_size(8), 8);
        assert_eq!(aligned_size(9), 16);
        assert_eq!(aligned_size(64), 64);
    }
}
