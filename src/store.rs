//! Feature container reading and writing.
//!
//! A container is a bincode-encoded tree of named groups whose leaves are
//! 1D `f32` arrays. Each leaf name is a stringified integer item identifier.
//! Containers holding several alternative embeddings (one per t-SNE
//! perplexity, for instance) put the items one level deeper, under a group
//! named `perplexity-{N}`; which shape to expect is given explicitly through
//! [`StoreLayout`].
//!
//! HDF5 files with the same group/array shape are read as well when the
//! `hdf5` feature is enabled; the format is detected from the file
//! signature or a `.h5`/`.hdf5` extension.
//!
//! Files are opened, decoded and closed within each call.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Seek},
    path::Path,
};
use tracing::{debug, info};

const MAGIC: [u8; 4] = *b"MSFS";
const FORMAT_VERSION: u32 = 1;
const HDF5_SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

/// Perplexity group selected when none is configured.
pub const DEFAULT_PERPLEXITY: u32 = 40;

/// A node in the container tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Group(BTreeMap<String, Node>),
    Array(Vec<f32>),
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    magic: [u8; 4],
    version: u32,
    root: BTreeMap<String, Node>,
}

/// Where the per-item arrays live inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreLayout {
    /// Items sit directly at the top level.
    #[default]
    Flat,
    /// Items sit under the `perplexity-{N}` group.
    Nested { perplexity: u32 },
}

impl StoreLayout {
    /// Name of the group holding the items, if any.
    pub fn group_name(&self) -> Option<String> {
        match self {
            StoreLayout::Flat => None,
            StoreLayout::Nested { perplexity } => Some(format!("perplexity-{}", perplexity)),
        }
    }
}

/// Feature vectors read from one container, rows aligned with `ids`.
///
/// Rows are stored contiguously: `[v1_d1, v1_d2, ..., v2_d1, v2_d2, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    ids: Vec<i64>,
    dimension: usize,
    vectors: Vec<f32>,
}

impl FeatureCollection {
    /// Builds a collection from `(id, vector)` records.
    ///
    /// Records keep the given order. Duplicate ids and rows of differing
    /// length are rejected as `MalformedStore`.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i64, Vec<f32>)>,
    {
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        let mut dimension = 0;

        for (id, vector) in records {
            if ids.is_empty() {
                dimension = vector.len();
            }
            check_row(id, &vector, dimension)?;
            ids.push(id);
            vectors.extend_from_slice(&vector);
        }

        let mut seen = ids.clone();
        seen.sort_unstable();
        if let Some(pair) = seen.windows(2).find(|w| w[0] == w[1]) {
            return Err(SearchError::MalformedStore(format!("duplicate item id {}", pair[0])));
        }

        Ok(FeatureCollection { ids, dimension, vectors })
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Raw dimensionality D, zero for an empty collection.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row-major matrix of all vectors.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Returns the vector stored at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Splits the collection into ids and the row-major matrix.
    pub fn into_parts(self) -> (Vec<i64>, usize, Vec<f32>) {
        (self.ids, self.dimension, self.vectors)
    }

    /// Orders records by ascending identifier.
    fn sort_by_id(&mut self) {
        let mut order: Vec<usize> = (0..self.ids.len()).collect();
        order.sort_by_key(|&i| self.ids[i]);

        let mut vectors = Vec::with_capacity(self.vectors.len());
        for &i in &order {
            vectors.extend_from_slice(self.row(i));
        }
        self.ids = order.iter().map(|&i| self.ids[i]).collect();
        self.vectors = vectors;
    }
}

/// Shape of a container, as reported by [`describe`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub top_level: Vec<String>,
    pub items: usize,
    pub dimension: usize,
}

/// Loads every item from the container at `path`.
///
/// Identifiers are returned in ascending order regardless of how the
/// container enumerates them, so positions are stable across loads.
///
/// # Errors
///
/// * `StoreNotFound` - the file does not exist or cannot be opened
/// * `MalformedStore` - decode failure, non-integer item names, non-array
///   items, inconsistent lengths, or a missing perplexity group
pub fn load(path: impl AsRef<Path>, layout: StoreLayout) -> Result<FeatureCollection> {
    let path = path.as_ref();
    let root = read_root(path)?;
    let items = select_items(&root, layout)?;

    let mut records = Vec::with_capacity(items.len());
    for (name, node) in items {
        let id = parse_id(name)?;
        records.push((id, array_payload(name, node)?.to_vec()));
    }

    let mut collection = FeatureCollection::from_records(records)?;
    collection.sort_by_id();

    info!(
        path = %path.display(),
        items = collection.len(),
        dimension = collection.dimension(),
        "loaded feature store"
    );
    Ok(collection)
}

/// Re-reads the vectors of `ids` from the container, in the caller's order.
///
/// Returns a row-major `ids.len() x D` matrix.
///
/// # Errors
///
/// Same as [`load`]; an id missing from the container is `MalformedStore`.
pub fn reload_subset(path: impl AsRef<Path>, ids: &[i64], layout: StoreLayout) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let root = read_root(path)?;
    let items = select_items(&root, layout)?;

    let mut by_id: HashMap<i64, &str> = HashMap::with_capacity(items.len());
    for name in items.keys() {
        by_id.insert(parse_id(name)?, name.as_str());
    }

    let mut vectors = Vec::new();
    let mut dimension = None;
    for &id in ids {
        let name = by_id
            .get(&id)
            .ok_or_else(|| SearchError::MalformedStore(format!("item {} not present in store", id)))?;
        let payload = array_payload(name, &items[*name])?;
        let expected = *dimension.get_or_insert(payload.len());
        check_row(id, payload, expected)?;
        vectors.extend_from_slice(payload);
    }

    debug!(path = %path.display(), items = ids.len(), "reloaded feature subset");
    Ok(vectors)
}

/// Summarizes a container without validating every item.
pub fn describe(path: impl AsRef<Path>, layout: StoreLayout) -> Result<StoreSummary> {
    let root = read_root(path.as_ref())?;
    let top_level = root.keys().cloned().collect();
    let items = select_items(&root, layout)?;
    let dimension = match items.values().next() {
        Some(Node::Array(values)) => values.len(),
        _ => 0,
    };

    Ok(StoreSummary { top_level, items: items.len(), dimension })
}

/// Accumulates records and writes them out as a container.
#[derive(Debug, Default)]
pub struct FeatureStoreWriter {
    layout: StoreLayout,
    items: BTreeMap<String, Node>,
    extra: BTreeMap<String, Node>,
}

impl FeatureStoreWriter {
    pub fn new(layout: StoreLayout) -> Self {
        FeatureStoreWriter { layout, ..Default::default() }
    }

    /// Adds or replaces the vector for `id`.
    pub fn insert(&mut self, id: i64, vector: Vec<f32>) -> &mut Self {
        self.items.insert(id.to_string(), Node::Array(vector));
        self
    }

    /// Adds an arbitrary top-level node next to the items.
    pub fn insert_node(&mut self, name: impl Into<String>, node: Node) -> &mut Self {
        self.extra.insert(name.into(), node);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes the container to `path`.
    ///
    /// The file is written next to the target and renamed into place, so
    /// readers never observe a partial container.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = StoreFile { magic: MAGIC, version: FORMAT_VERSION, root: self.tree() };
        let tmp = path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            bincode::serialize_into(writer, &file)?;
        }
        fs::rename(&tmp, path)?;

        info!(path = %path.display(), items = self.items.len(), "wrote feature store");
        Ok(())
    }

    /// Writes the container to `path` as an HDF5 file.
    #[cfg(feature = "hdf5")]
    pub fn save_hdf5(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("h5.tmp");
        crate::h5::write_tree(&tmp, &self.tree())?;
        fs::rename(&tmp, path)?;

        info!(path = %path.display(), items = self.items.len(), "wrote HDF5 feature store");
        Ok(())
    }

    fn tree(&self) -> BTreeMap<String, Node> {
        let mut root = self.extra.clone();
        match self.layout.group_name() {
            None => root.extend(self.items.clone()),
            Some(group) => {
                root.insert(group, Node::Group(self.items.clone()));
            }
        }
        root
    }
}

fn read_root(path: &Path) -> Result<BTreeMap<String, Node>> {
    let not_found = || SearchError::StoreNotFound { path: path.display().to_string() };
    if !path.is_file() {
        return Err(not_found());
    }
    let mut file = File::open(path).map_err(|_| not_found())?;
    if is_hdf5(path, &mut file)? {
        return read_hdf5_root(path);
    }
    let reader = BufReader::new(file);

    let decoded: StoreFile = bincode::deserialize_from(reader)
        .map_err(|e| SearchError::MalformedStore(format!("cannot decode container: {}", e)))?;

    if decoded.magic != MAGIC {
        return Err(SearchError::MalformedStore("not a feature container".to_string()));
    }
    if decoded.version != FORMAT_VERSION {
        return Err(SearchError::MalformedStore(format!(
            "unsupported container version {}",
            decoded.version
        )));
    }
    Ok(decoded.root)
}

/// Sniffs the HDF5 signature, leaving `file` positioned at the start.
fn is_hdf5(path: &Path, file: &mut File) -> Result<bool> {
    let by_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "h5" | "hdf5"));

    let mut signature = [0u8; 8];
    let by_signature = file.read_exact(&mut signature).is_ok() && signature == HDF5_SIGNATURE;
    file.rewind()?;

    Ok(by_extension || by_signature)
}

#[cfg(feature = "hdf5")]
fn read_hdf5_root(path: &Path) -> Result<BTreeMap<String, Node>> {
    crate::h5::read_tree(path)
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5_root(path: &Path) -> Result<BTreeMap<String, Node>> {
    Err(SearchError::MalformedStore(format!(
        "'{}' is an HDF5 container; rebuild with the `hdf5` feature to read it",
        path.display()
    )))
}

fn select_items(root: &BTreeMap<String, Node>, layout: StoreLayout) -> Result<&BTreeMap<String, Node>> {
    match layout.group_name() {
        None => Ok(root),
        Some(group) => match root.get(&group) {
            Some(Node::Group(children)) => Ok(children),
            Some(Node::Array(_)) => Err(SearchError::MalformedStore(format!("'{}' is not a group", group))),
            None => Err(SearchError::MalformedStore(format!("missing group '{}'", group))),
        },
    }
}

fn parse_id(name: &str) -> Result<i64> {
    name.trim()
        .parse::<i64>()
        .map_err(|_| SearchError::MalformedStore(format!("item name '{}' is not an integer", name)))
}

fn array_payload<'a>(name: &str, node: &'a Node) -> Result<&'a [f32]> {
    match node {
        Node::Array(values) => Ok(values),
        Node::Group(_) => Err(SearchError::MalformedStore(format!(
            "item '{}' is a group, expected a flat numeric array",
            name
        ))),
    }
}

fn check_row(id: i64, vector: &[f32], dimension: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(SearchError::MalformedStore(format!("item {} has an empty vector", id)));
    }
    if vector.len() != dimension {
        return Err(SearchError::MalformedStore(format!(
            "item {} has {} values, expected {}",
            id,
            vector.len(),
            dimension
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(SearchError::MalformedStore(format!("item {} contains non-finite values", id)));
    }
    Ok(())
}

#[cfg(test)]
mod store_test {
    use super::*;
    use tempfile::TempDir;

    fn write_flat(dir: &TempDir, records: &[(i64, Vec<f32>)]) -> std::path::PathBuf {
        let path = dir.path().join("features.msfs");
        let mut writer = FeatureStoreWriter::new(StoreLayout::Flat);
        for (id, v) in records {
            writer.insert(*id, v.clone());
        }
        writer.save(&path).unwrap();
        path
    }

    fn write_root(path: &Path, root: BTreeMap<String, Node>) {
        let file = StoreFile { magic: MAGIC, version: FORMAT_VERSION, root };
        let writer = BufWriter::new(File::create(path).unwrap());
        bincode::serialize_into(writer, &file).unwrap();
    }

    // ========== Load Tests ==========

    #[test]
    fn test_load_flat_store() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])]);

        let collection = load(&path, StoreLayout::Flat).unwrap();
        assert_eq!(collection.ids(), &[1, 2]);
        assert_eq!(collection.dimension(), 2);
        assert_eq!(collection.row(1), &[0.0, 1.0]);
    }

    #[test]
    fn test_load_sorts_numerically() {
        // Group names enumerate as "10" < "2" < "9"
        let dir = TempDir::new().unwrap();
        let path = write_flat(
            &dir,
            &[(10, vec![10.0]), (2, vec![2.0]), (9, vec![9.0])],
        );

        let collection = load(&path, StoreLayout::Flat).unwrap();
        assert_eq!(collection.ids(), &[2, 9, 10]);
        assert_eq!(collection.vectors(), &[2.0, 9.0, 10.0]);
    }

    #[test]
    fn test_load_nested_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tsne.msfs");
        let mut writer = FeatureStoreWriter::new(StoreLayout::Nested { perplexity: 40 });
        writer.insert(5, vec![0.5, 0.5]).insert(3, vec![0.3, 0.3]);
        writer.save(&path).unwrap();

        let collection = load(&path, StoreLayout::Nested { perplexity: 40 }).unwrap();
        assert_eq!(collection.ids(), &[3, 5]);

        // Wrong perplexity group
        let result = load(&path, StoreLayout::Nested { perplexity: 30 });
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));

        // Reading a nested container as flat hits the group node
        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load(dir.path().join("nope.msfs"), StoreLayout::Flat);

        match result {
            Err(SearchError::StoreNotFound { path }) => assert!(path.contains("nope.msfs")),
            other => panic!("expected StoreNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = load(dir.path(), StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::StoreNotFound { .. })));
    }

    #[test]
    fn test_load_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.msfs");
        fs::write(&path, b"definitely not bincode").unwrap();

        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0, 2.0])]);

        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_non_integer_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("names.msfs");
        let mut root = BTreeMap::new();
        root.insert("1".to_string(), Node::Array(vec![1.0]));
        root.insert("abc".to_string(), Node::Array(vec![2.0]));
        write_root(&path, root);

        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_duplicate_after_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dups.msfs");
        let mut root = BTreeMap::new();
        root.insert("7".to_string(), Node::Array(vec![1.0]));
        root.insert("007".to_string(), Node::Array(vec![2.0]));
        write_root(&path, root);

        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_non_finite_values() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[(1, vec![1.0, f32::NAN])]);

        let result = load(&path, StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    #[test]
    fn test_load_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[]);

        let collection = load(&path, StoreLayout::Flat).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.dimension(), 0);
    }

    // ========== Reload Tests ==========

    #[test]
    fn test_reload_subset_preserves_caller_order() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(
            &dir,
            &[(1, vec![1.0, 1.0]), (2, vec![2.0, 2.0]), (3, vec![3.0, 3.0])],
        );

        let vectors = reload_subset(&path, &[3, 1], StoreLayout::Flat).unwrap();
        assert_eq!(vectors, vec![3.0, 3.0, 1.0, 1.0]);
    }

    #[test]
    fn test_reload_subset_missing_id() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[(1, vec![1.0])]);

        let result = reload_subset(&path, &[1, 42], StoreLayout::Flat);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }

    // ========== Writer / Describe Tests ==========

    #[test]
    fn test_writer_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = write_flat(&dir, &[(1, vec![1.0])]);
        write_flat(&dir, &[(4, vec![4.0]), (5, vec![5.0])]);

        let collection = load(&path, StoreLayout::Flat).unwrap();
        assert_eq!(collection.ids(), &[4, 5]);
    }

    #[test]
    fn test_describe_nested() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tsne.msfs");
        let mut writer = FeatureStoreWriter::new(StoreLayout::Nested { perplexity: 20 });
        writer.insert(1, vec![0.0, 1.0, 2.0]);
        writer.insert_node("perplexity-50", Node::Group(BTreeMap::new()));
        writer.save(&path).unwrap();

        let summary = describe(&path, StoreLayout::Nested { perplexity: 20 }).unwrap();
        assert_eq!(summary.top_level, vec!["perplexity-20", "perplexity-50"]);
        assert_eq!(summary.items, 1);
        assert_eq!(summary.dimension, 3);
    }

    // ========== HDF5 Tests ==========

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_needs_feature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.bin");
        let mut bytes = HDF5_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        fs::write(&path, bytes).unwrap();

        match load(&path, StoreLayout::Flat) {
            Err(SearchError::MalformedStore(msg)) => assert!(msg.contains("hdf5")),
            other => panic!("expected MalformedStore, got {:?}", other),
        }
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_hdf5_nested_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tsne.h5");
        let mut writer = FeatureStoreWriter::new(StoreLayout::Nested { perplexity: 40 });
        writer.insert(12, vec![1.0, 2.0]).insert(3, vec![3.0, 4.0]);
        writer.insert_node("perplexity-30", Node::Group(BTreeMap::new()));
        writer.save_hdf5(&path).unwrap();

        let collection = load(&path, StoreLayout::Nested { perplexity: 40 }).unwrap();
        assert_eq!(collection.ids(), &[3, 12]);
        assert_eq!(collection.vectors(), &[3.0, 4.0, 1.0, 2.0]);

        let subset = reload_subset(&path, &[12], StoreLayout::Nested { perplexity: 40 }).unwrap();
        assert_eq!(subset, vec![1.0, 2.0]);

        let summary = describe(&path, StoreLayout::Nested { perplexity: 40 }).unwrap();
        assert_eq!(summary.top_level, vec!["perplexity-30", "perplexity-40"]);
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_hdf5_float64_items() {
        // Extractors usually write float64 arrays at the root
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.hdf5");
        {
            let file = hdf5::File::create(&path).unwrap();
            for (id, values) in [("7", [0.5f64, 1.5, 2.5]), ("2", [1.0, 0.0, -1.0])] {
                let dataset = file.new_dataset::<f64>().shape(3).create(id).unwrap();
                dataset.write_raw(&values[..]).unwrap();
            }
        }

        let collection = load(&path, StoreLayout::Flat).unwrap();
        assert_eq!(collection.ids(), &[2, 7]);
        assert_eq!(collection.row(1), &[0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_from_records_rejects_duplicates() {
        let result = FeatureCollection::from_records(vec![(1, vec![1.0]), (1, vec![2.0])]);
        assert!(matches!(result, Err(SearchError::MalformedStore(_))));
    }
}
