//! This is the vector math module
//! Provide Euclidean distance and dot product on `f32` slices

use crate::error::{Result, SearchError};

/// Squared Euclidean distance
/// dist2 = sum((a[i] - b[i])^2) for i = 0..a.len()
/// Can only process vectors with same dimensions
pub fn squared_euclidean(left: &[f32], right: &[f32]) -> Result<f32> {
    check_dimensions(left, right)?;

    let dist = left.iter()
        .zip(right.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();

    Ok(dist)
}

/// Euclidean distance
/// dist = sqrt(sum((a[i] - b[i])^2))
pub fn euclidean_distance(left: &[f32], right: &[f32]) -> Result<f32> {
    squared_euclidean(left, right).map(f32::sqrt)
}

/// Dot Product
/// dot_prod = sum(a[i] * b[i]) for i = 0..a.len()
/// Can only process vectors with same dimensions
pub fn dot_product(left: &[f32], right: &[f32]) -> Result<f32> {
    check_dimensions(left, right)?;

    let dot_prod = left.iter()
        .zip(right.iter())
        .map(|(x, y)| x * y)
        .sum();

    Ok(dot_prod)
}

fn check_dimensions(left: &[f32], right: &[f32]) -> Result<()> {
    if left.len() != right.len() {
        return Err(SearchError::DimensionMismatch {
            expected: left.len(),
            actual: right.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod vector_test {
    use super::*;

    // ========== Euclidean Distance Tests ==========

    #[test]
    fn test_euclidean_basic() {
        // ||[0,0] - [3,4]|| = sqrt(9+16) = 5
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        let result = euclidean_distance(&a, &b).unwrap();

        assert!((result - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_identical_vectors() {
        let a = vec![1.0, -2.0, 3.5];
        let result = euclidean_distance(&a, &a).unwrap();

        assert_eq!(result, 0.0);
    }

    #[test]
    fn test_euclidean_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-4.0, 0.5, 9.0];

        let ab = euclidean_distance(&a, &b).unwrap();
        let ba = euclidean_distance(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_squared_euclidean_negative_values() {
        // [-1,-1] to [1,1]: 4 + 4 = 8
        let a = vec![-1.0, -1.0];
        let b = vec![1.0, 1.0];
        let result = squared_euclidean(&a, &b).unwrap();

        assert!((result - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_dimension_mismatch() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0];

        let result = euclidean_distance(&a, &b);
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_euclidean_empty_vectors() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        let result = euclidean_distance(&a, &b).unwrap();

        assert_eq!(result, 0.0);
    }

    // ========== Dot Product Tests ==========

    #[test]
    fn test_dot_product_basic() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        // Expected: 1*4 + 2*5 + 3*6 = 4 + 10 + 18 = 32
        let result = dot_product(&a, &b).unwrap();

        assert!((result - 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let result = dot_product(&a, &b).unwrap();

        assert!((result - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_product_dimension_mismatch() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0];

        let result = dot_product(&a, &b);
        assert!(result.is_err());
    }
}
