//! Ownership of the active similarity index.
//!
//! Queries read a snapshot without locking. A rebuild constructs a complete
//! new index off to the side and publishes it with a single pointer swap, so
//! a query in flight finishes against whichever snapshot it started with.
//! A failed rebuild leaves the current snapshot in place.

use crate::error::{Result, SearchError};
use crate::index::{BuildOptions, SimilarityIndex, SimilarityMatch};
use arc_swap::ArcSwapOption;
use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex, TryLockError,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{error, info};

/// Everything needed to (re)build the index.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSpec {
    pub source: PathBuf,
    pub options: BuildOptions,
}

/// A published index together with its version number.
#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub index: SimilarityIndex,
}

/// Shared handle to the active index, injected into request handlers.
#[derive(Debug, Default)]
pub struct SearchService {
    active: ArcSwapOption<Snapshot>,
    next_version: AtomicU64,
    build_lock: Mutex<()>,
}

impl SearchService {
    /// Creates a service with no active index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a new index from `spec` and makes it active.
    ///
    /// Returns the new version. Only one rebuild runs at a time; a second
    /// caller gets `BuildInProgress` instead of waiting.
    ///
    /// # Errors
    ///
    /// Load and build errors are returned after being logged; the previously
    /// active index, if any, keeps serving.
    pub fn rebuild(&self, spec: &BuildSpec) -> Result<u64> {
        let _guard = match self.build_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(SearchError::BuildInProgress),
            // A panicked build never published anything
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        info!(source = %spec.source.display(), components = spec.options.n_components, "rebuilding similarity index");
        match SimilarityIndex::build(&spec.source, &spec.options) {
            Ok(index) => Ok(self.publish(index)),
            Err(e) => {
                error!(source = %spec.source.display(), error = %e, "index rebuild failed, keeping previous index");
                Err(e)
            }
        }
    }

    /// Makes a prebuilt index active and returns its version.
    pub fn install(&self, index: SimilarityIndex) -> u64 {
        self.publish(index)
    }

    /// Runs a similarity query against the current snapshot.
    ///
    /// # Errors
    ///
    /// `IndexNotReady` before the first successful build, otherwise the
    /// errors of [`SimilarityIndex::query`].
    pub fn query(&self, id: i64, n: usize) -> Result<Vec<SimilarityMatch>> {
        self.snapshot()?.index.query(id, n)
    }

    /// The current snapshot, kept alive for as long as the caller holds it.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.active.load_full().ok_or(SearchError::IndexNotReady)
    }

    /// Version of the active index, `0` when none is active.
    pub fn version(&self) -> u64 {
        self.active.load_full().map_or(0, |s| s.version)
    }

    pub fn is_ready(&self) -> bool {
        self.active.load().is_some()
    }

    fn publish(&self, index: SimilarityIndex) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let items = index.len();
        self.active.store(Some(Arc::new(Snapshot { version, index })));
        info!(version, items, "activated similarity index");
        version
    }
}
