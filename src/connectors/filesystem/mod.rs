
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::tree::{Document, DocumentTree, File, Folder, Repo};
use crate::{IndexError, Result};

struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Visible entries of `dir`, sorted by name
fn sorted_entries(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        entries.push(Entry {
            name,
            path: entry.path(),
            is_dir: entry.file_type()?.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Subdirectories of `dir`; anything else at this level is ignored
fn child_dirs(dir: &Path) -> Result<Vec<Entry>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|entry| {
            if !entry.is_dir {
                debug!("Ignoring non-directory {}", entry.path.display());
            }
            entry.is_dir
        })
        .collect())
}

fn read_document(folder_id: &str, entry: &Entry) -> Result<Document> {
    let mut files = Vec::new();
    for file in sorted_entries(&entry.path)? {
        if file.is_dir {
            debug!("Ignoring nested directory {}", file.path.display());
            continue;
        }
        let bytes = fs::read(&file.path)?;
        files.push(File {
            name: file.name,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    Ok(Document {
        id: format!("{}/{}", folder_id, entry.name),
        title: entry.name.clone(),
        author: None,
        tags: None,
        category: None,
        content: None,
        files,
    })
}

/// Read `root/<repo>/<folder>/<document>/<file>` into a tree.
///
/// Folder and document ids are qualified by their parent path
/// (`repo/folder`, `repo/folder/document`) so that documents with the same
/// directory name in different folders stay distinct.
#[inline]
pub fn import_from_fs(root: &Path) -> Result<DocumentTree> {
    if !root.is_dir() {
        return Err(IndexError::Structure(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut repos = Vec::new();
    for repo_entry in child_dirs(root)? {
        let mut folders = Vec::new();
        for folder_entry in child_dirs(&repo_entry.path)? {
            let folder_id = format!("{}/{}", repo_entry.name, folder_entry.name);
            let documents = child_dirs(&folder_entry.path)?
                .iter()
                .map(|doc_entry| read_document(&folder_id, doc_entry))
                .collect::<Result<Vec<_>>>()?;

            folders.push(Folder {
                id: folder_id,
                name: folder_entry.name,
                documents,
                folders: Vec::new(),
            });
        }

        repos.push(Repo {
            id: repo_entry.name.clone(),
            name: repo_entry.name,
            folders,
        });
    }

    let tree = DocumentTree::new(repos);
    info!(
        "Imported {} repositories ({} documents) from {}",
        tree.repos.len(),
        tree.document_count(),
        root.display()
    );
    Ok(tree)
}
