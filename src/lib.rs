//! # microsearch - Visual Similarity Search for Micrograph Collections
//!
//! microsearch answers "which images look most like this one?" over a
//! collection of precomputed image feature vectors. Vectors are read from a
//! feature container, reduced with PCA and searched exactly by Euclidean
//! distance. Items are addressed by the integer identifiers the surrounding
//! image database already uses.
//!
//! ## Example
//!
//! ```
//! use microsearch::{FeatureCollection, SimilarityIndex};
//!
//! let collection = FeatureCollection::from_records(vec![
//!     (1, vec![1.0, 0.0, 0.0, 0.0]),
//!     (2, vec![0.0, 1.0, 0.0, 0.0]),
//!     (3, vec![0.9, 0.1, 0.0, 0.0]),
//!     (4, vec![0.0, 0.0, 1.0, 0.0]),
//! ]).unwrap();
//!
//! let index = SimilarityIndex::from_collection(collection, 2).unwrap();
//!
//! // Items most similar to item 1, never including item 1 itself
//! let results = index.query(1, 2).unwrap();
//! assert_eq!(results[0].id, 3);
//! assert_eq!(results.len(), 2);
//! ```

pub mod config;
pub mod error;
#[cfg(feature = "hdf5")]
mod h5;
pub mod index;
pub mod neighbors;
pub mod projection;
pub mod server;
pub mod service;
pub mod store;
pub mod vector;

pub use config::Config;
pub use error::{Result, SearchError};
pub use index::{BuildOptions, SimilarityIndex, SimilarityMatch};
pub use projection::ProjectionModel;
pub use service::{BuildSpec, SearchService};
pub use store::{FeatureCollection, FeatureStoreWriter, StoreLayout};
