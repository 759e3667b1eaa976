// Tree import connectors
// Each one turns an external source into a DocumentTree for the flattener

pub mod filesystem;
pub mod json;
pub mod sqlite;

use std::path::Path;

use crate::Result;
use crate::tree::DocumentTree;

pub use filesystem::import_from_fs;
pub use json::import_from_json;
pub use sqlite::import_from_sqlite;

/// Where an import reads its tree from
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// A JSON file holding a list of repositories
    Json,
    /// A `repo/folder/document/file` directory tree
    Fs,
    /// An SQLite database with repos, folders, documents and files tables
    Sqlite,
}

/// Read a tree from `source` using the connector for `kind`
#[inline]
pub async fn import_tree(kind: SourceKind, source: &Path) -> Result<DocumentTree> {
    match kind {
        SourceKind::Json => import_from_json(source),
        SourceKind::Fs => import_from_fs(source),
        SourceKind::Sqlite => {
            let pool = sqlite::open_source(source).await?;
            let tree = import_from_sqlite(&pool).await?;
            pool.close().await;
            Ok(tree)
        }
    }
}
