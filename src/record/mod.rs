// Flat record module
// Denormalized per-document rows and their deterministic text rendering


use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Separator between `field: value` segments and between file entries
pub const SEGMENT_SEPARATOR: &str = " | ";

/// Separator between items of list-valued fields
pub const LIST_SEPARATOR: &str = ", ";

/// One row per document, with its ancestry copied in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub document_id: String,
    pub repo_id: String,
    pub repo_name: String,
    pub folder_id: String,
    pub folder_name: String,
    pub title: String,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub content: Option<String>,
    /// `None` when the document has no files at all
    pub files_content: Option<String>,
}

/// The record's field set, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    DocumentId,
    RepoId,
    RepoName,
    FolderId,
    FolderName,
    Title,
    Author,
    Tags,
    Category,
    Content,
    FilesContent,
}

/// A single field's value borrowed from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    List(&'a [String]),
}

impl RecordField {
    pub const ALL: [Self; 11] = [
        Self::DocumentId,
        Self::RepoId,
        Self::RepoName,
        Self::FolderId,
        Self::FolderName,
        Self::Title,
        Self::Author,
        Self::Tags,
        Self::Category,
        Self::Content,
        Self::FilesContent,
    ];

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DocumentId => "document_id",
            Self::RepoId => "repo_id",
            Self::RepoName => "repo_name",
            Self::FolderId => "folder_id",
            Self::FolderName => "folder_name",
            Self::Title => "title",
            Self::Author => "author",
            Self::Tags => "tags",
            Self::Category => "category",
            Self::Content => "content",
            Self::FilesContent => "files_content",
        }
    }

    /// Whether a record may leave this field empty
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(
            self,
            Self::Author | Self::Tags | Self::Category | Self::Content | Self::FilesContent
        )
    }

    #[inline]
    pub const fn is_list(self) -> bool {
        matches!(self, Self::Tags)
    }
}

impl fmt::Display for RecordField {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordField {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("unknown record field '{}'", s))
    }
}

impl FlatRecord {
    /// Borrow one field; `None` when an optional field is absent
    #[inline]
    pub fn get(&self, field: RecordField) -> Option<FieldValue<'_>> {
        match field {
            RecordField::DocumentId => Some(FieldValue::Text(&self.document_id)),
            RecordField::RepoId => Some(FieldValue::Text(&self.repo_id)),
            RecordField::RepoName => Some(FieldValue::Text(&self.repo_name)),
            RecordField::FolderId => Some(FieldValue::Text(&self.folder_id)),
            RecordField::FolderName => Some(FieldValue::Text(&self.folder_name)),
            RecordField::Title => Some(FieldValue::Text(&self.title)),
            RecordField::Author => self.author.as_deref().map(FieldValue::Text),
            RecordField::Tags => self.tags.as_deref().map(FieldValue::List),
            RecordField::Category => self.category.as_deref().map(FieldValue::Text),
            RecordField::Content => self.content.as_deref().map(FieldValue::Text),
            RecordField::FilesContent => self.files_content.as_deref().map(FieldValue::Text),
        }
    }

    /// Render this record as embedding input.
    ///
    /// Fields are visited in [`RecordField::ALL`] order, absent fields are
    /// skipped, lists are comma-joined and segments are `field: value` joined
    /// with [`SEGMENT_SEPARATOR`]. The vector itself is never part of a record,
    /// so it can never leak into the rendering.
    #[inline]
    pub fn render(&self) -> String {
        RecordField::ALL
            .into_iter()
            .filter_map(|field| {
                self.get(field)
                    .map(|value| format!("{}: {}", field.name(), value.render()))
            })
            .join(SEGMENT_SEPARATOR)
    }
}

impl FieldValue<'_> {
    #[inline]
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(text) => (*text).to_string(),
            FieldValue::List(items) => items.iter().join(LIST_SEPARATOR),
        }
    }
}

/// Render every record, preserving input order
#[inline]
pub fn render_all(records: &[FlatRecord]) -> Vec<String> {
    records.iter().map(FlatRecord::render).collect()
}
