
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::tree::{Document, DocumentTree, File, Folder, Repo};

/// Open an existing source database read-only
#[inline]
pub async fn open_source(path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open source database {}", path.display()))
}

fn text(row: &SqliteRow, column: &str) -> Result<String> {
    row.try_get(column)
        .with_context(|| format!("Failed to read column {}", column))
}

fn optional_text(row: &SqliteRow, column: &str) -> Result<Option<String>> {
    row.try_get(column)
        .with_context(|| format!("Failed to read column {}", column))
}

fn split_tags(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|tags| {
        tags.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Rebuild a tree from the `repos`, `folders`, `documents` and `files` tables.
///
/// Rows are taken in rowid order. Rows whose parent id does not exist are
/// skipped with a warning.
#[inline]
pub async fn import_from_sqlite(pool: &SqlitePool) -> Result<DocumentTree> {
    let mut files_by_document: HashMap<String, Vec<File>> = HashMap::new();
    let rows = sqlx::query(
        r#"
        SELECT CAST(document_id AS TEXT) AS document_id, file_name, content
        FROM files ORDER BY rowid
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to read files table")?;
    for row in rows {
        files_by_document
            .entry(text(&row, "document_id")?)
            .or_default()
            .push(File {
                name: text(&row, "file_name")?,
                content: optional_text(&row, "content")?.unwrap_or_default(),
            });
    }

    let mut documents_by_folder: HashMap<String, Vec<Document>> = HashMap::new();
    let rows = sqlx::query(
        r#"
        SELECT CAST(document_id AS TEXT) AS document_id,
               CAST(folder_id AS TEXT) AS folder_id,
               title, author, tags, category, content
        FROM documents ORDER BY rowid
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to read documents table")?;
    for row in rows {
        let id = text(&row, "document_id")?;
        let files = files_by_document.remove(&id).unwrap_or_default();
        documents_by_folder
            .entry(text(&row, "folder_id")?)
            .or_default()
            .push(Document {
                title: optional_text(&row, "title")?.unwrap_or_default(),
                author: optional_text(&row, "author")?,
                tags: split_tags(optional_text(&row, "tags")?),
                category: optional_text(&row, "category")?,
                content: optional_text(&row, "content")?,
                files,
                id,
            });
    }
    for (document_id, files) in &files_by_document {
        warn!(
            "Skipping {} files of unknown document {}",
            files.len(),
            document_id
        );
    }

    let mut folders_by_repo: HashMap<String, Vec<Folder>> = HashMap::new();
    let rows = sqlx::query(
        r#"
        SELECT CAST(folder_id AS TEXT) AS folder_id,
               CAST(repo_id AS TEXT) AS repo_id,
               folder_name
        FROM folders ORDER BY rowid
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to read folders table")?;
    for row in rows {
        let id = text(&row, "folder_id")?;
        let documents = documents_by_folder.remove(&id).unwrap_or_default();
        folders_by_repo
            .entry(text(&row, "repo_id")?)
            .or_default()
            .push(Folder {
                name: optional_text(&row, "folder_name")?.unwrap_or_default(),
                documents,
                folders: Vec::new(),
                id,
            });
    }
    for (folder_id, documents) in &documents_by_folder {
        warn!(
            "Skipping {} documents of unknown folder {}",
            documents.len(),
            folder_id
        );
    }

    let rows = sqlx::query(
        "SELECT CAST(repo_id AS TEXT) AS repo_id, repo_name FROM repos ORDER BY rowid",
    )
    .fetch_all(pool)
    .await
    .context("Failed to read repos table")?;
    let mut repos = Vec::with_capacity(rows.len());
    for row in rows {
        let id = text(&row, "repo_id")?;
        debug!("Assembling repository {}", id);
        repos.push(Repo {
            name: optional_text(&row, "repo_name")?.unwrap_or_default(),
            folders: folders_by_repo.remove(&id).unwrap_or_default(),
            id,
        });
    }
    for (repo_id, folders) in &folders_by_repo {
        warn!(
            "Skipping {} folders of unknown repository {}",
            folders.len(),
            repo_id
        );
    }

    let tree = DocumentTree::new(repos);
    info!(
        "Imported {} repositories ({} documents) from SQLite",
        tree.repos.len(),
        tree.document_count()
    );
    Ok(tree)
}
