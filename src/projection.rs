//! Principal Component Analysis used to shrink raw feature vectors before
//! indexing.
//!
//! Fitting mean-centers the data and eigendecomposes whichever of the two
//! equivalent symmetric matrices is smaller: the `N x N` Gram matrix
//! `Xc Xcᵀ` when there are fewer samples than features (the usual case for
//! CNN descriptors), otherwise the `D x D` scatter matrix `Xcᵀ Xc`.
//! Arithmetic during the fit is done in `f64`; the fitted model is stored
//! in `f32`.

use crate::error::{Result, SearchError};
use crate::vector::dot_product;
use nalgebra::{DMatrix, SymmetricEigen};
use tracing::debug;

/// Eigenvalues below this fraction of the largest are treated as zero.
const RELATIVE_RANK_TOLERANCE: f64 = 1e-10;

/// A fitted linear map from `D` raw dimensions to `K` principal components.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionModel {
    mean: Vec<f32>,
    /// `K x D`, row-major, one principal direction per row.
    components: Vec<f32>,
    explained_variance: Vec<f32>,
    explained_variance_ratio: Vec<f32>,
    input_dimension: usize,
    output_dimension: usize,
}

impl ProjectionModel {
    /// Fits `k` principal components on a row-major `n_rows x dim` matrix.
    ///
    /// # Errors
    ///
    /// * `InvalidProjectionRank` - `k` is zero or exceeds `dim` or `n_rows`
    /// * `DimensionMismatch` - `data` is not `n_rows * dim` long
    pub fn fit(data: &[f32], n_rows: usize, dim: usize, k: usize) -> Result<Self> {
        if k == 0 || k > dim || k > n_rows {
            return Err(SearchError::InvalidProjectionRank {
                requested: k,
                samples: n_rows,
                features: dim,
            });
        }
        if data.len() != n_rows * dim {
            return Err(SearchError::DimensionMismatch {
                expected: n_rows * dim,
                actual: data.len(),
            });
        }

        let mut mean = vec![0.0f64; dim];
        for row in data.chunks_exact(dim) {
            for (m, &x) in mean.iter_mut().zip(row) {
                *m += x as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= n_rows as f64;
        }

        let centered = DMatrix::from_fn(n_rows, dim, |i, j| data[i * dim + j] as f64 - mean[j]);

        let (eigenvalues, components) = if n_rows <= dim {
            gram_components(&centered, k)
        } else {
            scatter_components(&centered, k)
        };

        let denom = if n_rows > 1 { (n_rows - 1) as f64 } else { 1.0 };
        let total: f64 = eigenvalues.iter().filter(|&&v| v > 0.0).sum();
        let explained_variance: Vec<f32> = eigenvalues
            .iter()
            .take(k)
            .map(|&v| (v.max(0.0) / denom) as f32)
            .collect();
        let explained_variance_ratio: Vec<f32> = eigenvalues
            .iter()
            .take(k)
            .map(|&v| if total > 0.0 { (v.max(0.0) / total) as f32 } else { 0.0 })
            .collect();

        debug!(samples = n_rows, features = dim, components = k, "fitted projection");

        Ok(ProjectionModel {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            components: components.into_iter().map(|c| c as f32).collect(),
            explained_variance,
            explained_variance_ratio,
            input_dimension: dim,
            output_dimension: k,
        })
    }

    /// Projects a single raw vector.
    pub fn transform(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.input_dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.input_dimension,
                actual: vector.len(),
            });
        }

        let centered: Vec<f32> = vector.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        self.components
            .chunks_exact(self.input_dimension)
            .map(|component| dot_product(component, &centered))
            .collect()
    }

    /// Projects a row-major matrix of raw vectors.
    pub fn transform_matrix(&self, data: &[f32]) -> Result<Vec<f32>> {
        if data.len() % self.input_dimension != 0 {
            return Err(SearchError::DimensionMismatch {
                expected: self.input_dimension,
                actual: data.len() % self.input_dimension,
            });
        }

        let mut reduced = Vec::with_capacity(data.len() / self.input_dimension * self.output_dimension);
        for row in data.chunks_exact(self.input_dimension) {
            reduced.extend(self.transform(row)?);
        }
        Ok(reduced)
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// Principal direction `i`, of length `input_dimension`.
    pub fn component(&self, i: usize) -> Option<&[f32]> {
        self.components.chunks_exact(self.input_dimension).nth(i)
    }

    pub fn explained_variance(&self) -> &[f32] {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &[f32] {
        &self.explained_variance_ratio
    }

    pub fn input_dimension(&self) -> usize {
        self.input_dimension
    }

    pub fn output_dimension(&self) -> usize {
        self.output_dimension
    }
}

/// Top-`k` directions from the `n x n` Gram matrix.
///
/// For an eigenpair `(λ, u)` of `Xc Xcᵀ`, `Xcᵀ u / sqrt(λ)` is a unit
/// eigenvector of `Xcᵀ Xc` with the same eigenvalue.
fn gram_components(centered: &DMatrix<f64>, k: usize) -> (Vec<f64>, Vec<f64>) {
    let dim = centered.ncols();
    let gram = centered * centered.transpose();
    let (values, vectors) = symmetric_eigen(gram);
    let cutoff = rank_cutoff(&values);

    let mut components = vec![0.0; k * dim];
    for c in 0..k {
        let lambda = values[c];
        if lambda <= cutoff {
            continue;
        }
        let direction = centered.tr_mul(&vectors.column(c)) / lambda.sqrt();
        let out = &mut components[c * dim..(c + 1) * dim];
        out.copy_from_slice(direction.as_slice());
        normalize_sign(out);
    }

    (values, components)
}

/// Top-`k` directions from the `dim x dim` scatter matrix.
fn scatter_components(centered: &DMatrix<f64>, k: usize) -> (Vec<f64>, Vec<f64>) {
    let dim = centered.ncols();
    let scatter = centered.tr_mul(centered);
    let (values, vectors) = symmetric_eigen(scatter);
    let cutoff = rank_cutoff(&values);

    let mut components = vec![0.0; k * dim];
    for c in 0..k {
        if values[c] <= cutoff {
            continue;
        }
        let out = &mut components[c * dim..(c + 1) * dim];
        for (o, v) in out.iter_mut().zip(vectors.column(c).iter()) {
            *o = *v;
        }
        normalize_sign(out);
    }

    (values, components)
}

/// Largest eigenvalue still counted as zero variance.
fn rank_cutoff(descending: &[f64]) -> f64 {
    descending.first().copied().unwrap_or(0.0).max(0.0) * RELATIVE_RANK_TOLERANCE
}

/// Flips `v` so its largest-magnitude entry is positive.
fn normalize_sign(v: &mut [f64]) {
    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        for x in v.iter_mut() {
            *x = -*x;
        }
    }
}

/// Eigendecomposition of a symmetric matrix.
///
/// Returns eigenvalues in descending order and the matching unit
/// eigenvectors as the columns of the second matrix.
fn symmetric_eigen(matrix: DMatrix<f64>) -> (Vec<f64>, DMatrix<f64>) {
    let n = matrix.nrows();
    let eigen = SymmetricEigen::new(matrix);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        eigen.eigenvalues[j]
            .total_cmp(&eigen.eigenvalues[i])
            .then(i.cmp(&j))
    });

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = eigen.eigenvectors.select_columns(&order);
    (values, vectors)
}
