
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::tree::DocumentTree;
use crate::{IndexError, Result};

/// Read a JSON document tree from `path`.
///
/// Accepts either a bare list of repositories or a single-keyed wrapper
/// object such as `{"repos": [...]}`.
#[inline]
pub fn import_from_json(path: &Path) -> Result<DocumentTree> {
    debug!("Reading JSON tree from {}", path.display());

    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        IndexError::Structure(format!("{} is not valid JSON: {}", path.display(), e))
    })?;

    let tree = DocumentTree::from_value(value)?;
    info!(
        "Imported {} repositories ({} documents) from {}",
        tree.repos.len(),
        tree.document_count(),
        path.display()
    );
    Ok(tree)
}
