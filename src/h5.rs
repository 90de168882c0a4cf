//! HDF5 feature containers, as produced by the feature extraction pipeline.
//!
//! The file is read into the same [`Node`] tree as native containers, so
//! layout selection and item validation are shared with [`crate::store`].
//! Item arrays may be stored as 32- or 64-bit floats of any shape; they are
//! flattened and narrowed to `f32`.

use crate::error::{Result, SearchError};
use crate::store::Node;
use hdf5::types::{FloatSize, TypeDescriptor};
use hdf5::{Dataset, File, Group};
use std::collections::BTreeMap;
use std::path::Path;

/// Root, perplexity group, items.
const MAX_DEPTH: usize = 2;

pub(crate) fn read_tree(path: &Path) -> Result<BTreeMap<String, Node>> {
    let file = File::open(path).map_err(malformed)?;
    read_group(&file, 0)
}

pub(crate) fn write_tree(path: &Path, root: &BTreeMap<String, Node>) -> Result<()> {
    let file = File::create(path).map_err(write_failed)?;
    write_group(&file, root)?;
    file.close().map_err(write_failed)
}

fn read_group(group: &Group, depth: usize) -> Result<BTreeMap<String, Node>> {
    let mut children = BTreeMap::new();
    for name in group.member_names().map_err(malformed)? {
        let node = if let Ok(dataset) = group.dataset(&name) {
            Node::Array(read_array(&name, &dataset)?)
        } else if depth < MAX_DEPTH {
            let child = group.group(&name).map_err(malformed)?;
            Node::Group(read_group(&child, depth + 1)?)
        } else {
            Node::Group(BTreeMap::new())
        };
        children.insert(name, node);
    }
    Ok(children)
}

fn read_array(name: &str, dataset: &Dataset) -> Result<Vec<f32>> {
    let descriptor = dataset.dtype().and_then(|t| t.to_descriptor()).map_err(malformed)?;
    match descriptor {
        TypeDescriptor::Float(FloatSize::U4) => dataset.read_raw::<f32>().map_err(malformed),
        TypeDescriptor::Float(FloatSize::U8) => {
            let values = dataset.read_raw::<f64>().map_err(malformed)?;
            Ok(values.into_iter().map(|v| v as f32).collect())
        }
        _ => Err(SearchError::MalformedStore(format!(
            "item '{}' is not a floating point array",
            name
        ))),
    }
}

fn write_group(group: &Group, children: &BTreeMap<String, Node>) -> Result<()> {
    for (name, node) in children {
        match node {
            Node::Array(values) => {
                group
                    .new_dataset::<f32>()
                    .shape(values.len())
                    .create(name.as_str())
                    .and_then(|dataset| dataset.write_raw(values.as_slice()))
                    .map_err(write_failed)?;
            }
            Node::Group(grandchildren) => {
                let child = group.create_group(name).map_err(write_failed)?;
                write_group(&child, grandchildren)?;
            }
        }
    }
    Ok(())
}

fn malformed(error: hdf5::Error) -> SearchError {
    SearchError::MalformedStore(format!("cannot read HDF5 container: {}", error))
}

fn write_failed(error: hdf5::Error) -> SearchError {
    SearchError::Io(std::io::Error::other(error.to_string()))
}
