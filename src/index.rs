//! The similarity index: PCA-reduced feature vectors behind an exact
//! nearest-neighbor search, addressed by item identifier.

use crate::error::{Result, SearchError};
use crate::neighbors::NeighborIndex;
use crate::projection::ProjectionModel;
use crate::store::{self, FeatureCollection, StoreLayout};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Instant};
use tracing::{debug, info};

/// Default number of principal components kept.
pub const DEFAULT_COMPONENTS: usize = 64;

/// How to read and reduce a feature container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub n_components: usize,
    pub layout: StoreLayout,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions { n_components: DEFAULT_COMPONENTS, layout: StoreLayout::Flat }
    }
}

/// One ranked result of a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub id: i64,
    pub distance: f32,
    /// `distance` formatted with four decimals, as displayed to users.
    pub score: String,
}

impl SimilarityMatch {
    fn new(id: i64, distance: f32) -> Self {
        SimilarityMatch { id, distance, score: format!("{:.4}", distance) }
    }
}

/// Reduced feature vectors with their identifiers, the projection that
/// produced them and a neighbor index over them.
///
/// Immutable once built. Row `i` of the neighbor index belongs to `ids[i]`.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    ids: Vec<i64>,
    positions: HashMap<i64, usize>,
    projection: ProjectionModel,
    neighbors: NeighborIndex,
}

impl SimilarityIndex {
    /// Loads the container at `source` and builds an index over it.
    ///
    /// # Errors
    ///
    /// Loader errors are returned unchanged; `InvalidProjectionRank` when
    /// the collection is too small for `options.n_components`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use microsearch::{BuildOptions, SimilarityIndex};
    ///
    /// let index = SimilarityIndex::build("features.msfs", &BuildOptions::default()).unwrap();
    /// for hit in index.query(42, 16).unwrap() {
    ///     println!("{} {}", hit.id, hit.score);
    /// }
    /// ```
    pub fn build(source: impl AsRef<Path>, options: &BuildOptions) -> Result<Self> {
        let started = Instant::now();
        let collection = store::load(source.as_ref(), options.layout)?;
        let index = Self::from_collection(collection, options.n_components)?;

        info!(
            items = index.len(),
            components = options.n_components,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built similarity index"
        );
        Ok(index)
    }

    /// Builds an index from vectors already in memory.
    ///
    /// The raw vectors are dropped once reduced.
    ///
    /// # Examples
    ///
    /// ```
    /// use microsearch::{FeatureCollection, SimilarityIndex};
    ///
    /// let collection = FeatureCollection::from_records(vec![
    ///     (1, vec![1.0, 0.0, 0.0, 0.0]),
    ///     (2, vec![0.0, 1.0, 0.0, 0.0]),
    ///     (3, vec![0.9, 0.1, 0.0, 0.0]),
    ///     (4, vec![0.0, 0.0, 1.0, 0.0]),
    /// ]).unwrap();
    ///
    /// let index = SimilarityIndex::from_collection(collection, 2).unwrap();
    /// let results = index.query(1, 1).unwrap();
    /// assert_eq!(results[0].id, 3);
    /// ```
    pub fn from_collection(collection: FeatureCollection, n_components: usize) -> Result<Self> {
        let n_rows = collection.len();
        let (ids, dimension, raw) = collection.into_parts();

        let projection = ProjectionModel::fit(&raw, n_rows, dimension, n_components)?;
        let reduced = projection.transform_matrix(&raw)?;
        drop(raw);

        let neighbors = NeighborIndex::new(reduced, n_components)?;
        let positions = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        Ok(SimilarityIndex { ids, positions, projection, neighbors })
    }

    /// Returns the `n` items most similar to `id`, nearest first.
    ///
    /// The query item itself is never part of the result. Fewer than `n`
    /// results come back only when the index holds fewer than `n + 1` items.
    ///
    /// # Errors
    ///
    /// `UnknownIdentifier` if `id` is not indexed.
    pub fn query(&self, id: i64, n: usize) -> Result<Vec<SimilarityMatch>> {
        let position = self.position_of(id)?;
        // At most every other item can come back
        let n = n.min(self.len().saturating_sub(1));
        if n == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .neighbors
            .row(position)
            .ok_or(SearchError::UnknownIdentifier(id))?;
        let hits = self.neighbors.search(vector, n + 1)?;

        // Duplicate vectors can outrank the item itself, so drop it by id
        let results: Vec<SimilarityMatch> = hits
            .into_iter()
            .map(|hit| (self.ids[hit.position], hit.distance))
            .filter(|&(hit_id, _)| hit_id != id)
            .take(n)
            .map(|(hit_id, distance)| SimilarityMatch::new(hit_id, distance))
            .collect();

        debug!(id, requested = n, returned = results.len(), "similarity query");
        Ok(results)
    }

    /// Same as [`query`](Self::query), split into display scores and ids.
    pub fn query_scores(&self, id: i64, n: usize) -> Result<(Vec<String>, Vec<i64>)> {
        let results = self.query(id, n)?;
        Ok(results.into_iter().map(|m| (m.score, m.id)).unzip())
    }

    /// Returns the `n` indexed items nearest to an external raw vector.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `raw` does not have the raw feature length.
    pub fn query_vector(&self, raw: &[f32], n: usize) -> Result<Vec<SimilarityMatch>> {
        let reduced = self.projection.transform(raw)?;
        let hits = self.neighbors.search(&reduced, n)?;

        Ok(hits
            .into_iter()
            .map(|hit| SimilarityMatch::new(self.ids[hit.position], hit.distance))
            .collect())
    }

    /// Indexed identifiers, in ascending order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The reduced vector stored for `id`.
    pub fn reduced_vector(&self, id: i64) -> Option<&[f32]> {
        self.positions.get(&id).and_then(|&p| self.neighbors.row(p))
    }

    pub fn projection(&self) -> &ProjectionModel {
        &self.projection
    }

    fn position_of(&self, id: i64) -> Result<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(SearchError::UnknownIdentifier(id))
    }
}
