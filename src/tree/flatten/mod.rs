
use std::collections::HashSet;

use itertools::Itertools;
use tracing::debug;

use super::{Document, DocumentTree, Folder, Repo};
use crate::record::{FlatRecord, SEGMENT_SEPARATOR};
use crate::{IndexError, Result};

/// Turns a document tree into one [`FlatRecord`] per document node.
///
/// Traversal is depth-first in tree read order: a folder's own documents come
/// before anything in its sub-folders. The walk uses an explicit stack, so
/// nesting depth is bounded by heap rather than call stack, and a folder id
/// that reappears in its own ancestry is reported as a structure error.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchyFlattener;

struct Frame<'a> {
    folder: &'a Folder,
    /// Folder ids from the top-level folder down to (and including) this one
    ancestry: Vec<&'a str>,
}

impl HierarchyFlattener {
    #[inline]
    pub fn new() -> Self {
        Self
    }

    #[inline]
    pub fn flatten(&self, tree: &DocumentTree) -> Result<Vec<FlatRecord>> {
        self.flatten_repos(&tree.repos)
    }

    /// Parse and flatten a raw JSON value in one step
    #[inline]
    pub fn flatten_value(&self, value: serde_json::Value) -> Result<Vec<FlatRecord>> {
        let tree = DocumentTree::from_value(value)?;
        self.flatten(&tree)
    }

    #[inline]
    pub fn flatten_repos(&self, repos: &[Repo]) -> Result<Vec<FlatRecord>> {
        let mut records = Vec::new();
        let mut seen_documents: HashSet<&str> = HashSet::new();

        for repo in repos {
            let mut stack: Vec<Frame<'_>> = repo
                .folders
                .iter()
                .rev()
                .map(|folder| Frame {
                    folder,
                    ancestry: vec![folder.id.as_str()],
                })
                .collect();

            while let Some(frame) = stack.pop() {
                for document in &frame.folder.documents {
                    if !seen_documents.insert(document.id.as_str()) {
                        return Err(IndexError::Structure(format!(
                            "document id '{}' appears more than once (repo '{}', folder '{}')",
                            document.id, repo.id, frame.folder.id
                        )));
                    }
                    records.push(flatten_document(repo, frame.folder, document));
                }

                // Reverse so the first sub-folder is popped first
                for child in frame.folder.folders.iter().rev() {
                    if frame.ancestry.contains(&child.id.as_str()) {
                        return Err(IndexError::Structure(format!(
                            "folder cycle detected: '{}' is its own ancestor (path {})",
                            child.id,
                            frame.ancestry.join(" > ")
                        )));
                    }
                    let mut ancestry = frame.ancestry.clone();
                    ancestry.push(child.id.as_str());
                    stack.push(Frame {
                        folder: child,
                        ancestry,
                    });
                }
            }
        }

        debug!(
            "Flattened {} repositories into {} records",
            repos.len(),
            records.len()
        );
        Ok(records)
    }
}

fn flatten_document(repo: &Repo, folder: &Folder, document: &Document) -> FlatRecord {
    let files_content = if document.files.is_empty() {
        None
    } else {
        Some(
            document
                .files
                .iter()
                .map(|file| format!("{}: {}", file.name, file.content))
                .join(SEGMENT_SEPARATOR),
        )
    };

    FlatRecord {
        document_id: document.id.clone(),
        repo_id: repo.id.clone(),
        repo_name: repo.name.clone(),
        folder_id: folder.id.clone(),
        folder_name: folder.name.clone(),
        title: document.title.clone(),
        author: document.author.clone(),
        tags: document.tags.clone(),
        category: document.category.clone(),
        content: document.content.clone(),
        files_content,
    }
}
