//! Exact Euclidean k-nearest-neighbor search over a flat matrix.

use crate::error::{Result, SearchError};
use crate::vector::euclidean_distance;

/// One search hit: row position in the indexed matrix and its distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Brute-force neighbor index.
///
/// Rows are stored contiguously as `[r1_d1, r1_d2, ..., r2_d1, ...]`.
/// Every query scans all rows, so results are exact.
#[derive(Debug, Clone)]
pub struct NeighborIndex {
    rows: Vec<f32>,
    dimension: usize,
}

impl NeighborIndex {
    /// Indexes a row-major matrix with `dimension` columns.
    pub fn new(rows: Vec<f32>, dimension: usize) -> Result<Self> {
        if dimension == 0 || rows.len() % dimension != 0 {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: rows.len(),
            });
        }
        Ok(NeighborIndex { rows, dimension })
    }

    pub fn len(&self) -> usize {
        self.rows.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the row at `position`, if any.
    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.rows.get(start..start.checked_add(self.dimension)?)
    }

    /// Finds the `k` rows closest to `query`.
    ///
    /// Results are ordered by ascending distance, ties by ascending
    /// position. Asking for more rows than indexed returns all of them.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        // Bounded sorted buffer of (position, distance)
        let mut best: Vec<(usize, f32)> = Vec::with_capacity(k + 1);
        for (position, row) in self.rows.chunks_exact(self.dimension).enumerate() {
            let dist = euclidean_distance(row, query)?;
            if best.len() == k && dist >= best[k - 1].1 {
                continue;
            }
            // Equal distances insert after existing entries, keeping lower positions first
            let insert_index = best.partition_point(|&(_, d)| d <= dist);
            best.insert(insert_index, (position, dist));
            best.truncate(k);
        }

        Ok(best
            .into_iter()
            .map(|(position, distance)| Neighbor { position, distance })
            .collect())
    }
}

#[cfg(test)]
mod neighbors_test {
    use super::*;

    fn grid() -> NeighborIndex {
        // Points on a line at 0, 1, 3, 6
        NeighborIndex::new(vec![0.0, 0.0, 1.0, 0.0, 3.0, 0.0, 6.0, 0.0], 2).unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        assert!(NeighborIndex::new(vec![1.0, 2.0, 3.0], 2).is_err());
        assert!(NeighborIndex::new(vec![], 0).is_err());
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = grid();
        let results = index.search(&[2.9, 0.0], 4).unwrap();

        let positions: Vec<usize> = results.iter().map(|n| n.position).collect();
        assert_eq!(positions, vec![2, 1, 0, 3]);
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
        assert!((results[0].distance - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = grid();
        let results = index.search(&[0.0, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].position, 0);
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[1].position, 1);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let index = grid();
        let results = index.search(&[0.0, 0.0], 100).unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_search_huge_k_is_bounded_by_index() {
        let index = grid();
        assert_eq!(index.search(&[0.0, 0.0], usize::MAX).unwrap().len(), 4);
        assert_eq!(index.search(&[0.0, 0.0], usize::MAX / 2).unwrap().len(), 4);
        assert_eq!(index.search(&[0.0, 0.0], 1_000_000_000).unwrap().len(), 4);
    }

    #[test]
    fn test_search_k_zero() {
        let index = grid();
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_broken_by_position() {
        // Positions 1 and 2 are both at distance 1 from the origin
        let index = NeighborIndex::new(vec![5.0, 5.0, 0.0, 1.0, 1.0, 0.0, 0.0, -1.0], 2).unwrap();
        let results = index.search(&[0.0, 0.0], 3).unwrap();

        let positions: Vec<usize> = results.iter().map(|n| n.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = grid();
        assert!(matches!(
            index.search(&[0.0, 0.0, 0.0], 1),
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_row_access() {
        let index = grid();
        assert_eq!(index.row(3), Some(&[6.0, 0.0][..]));
        assert_eq!(index.row(4), None);
        assert_eq!(index.len(), 4);
    }
}
