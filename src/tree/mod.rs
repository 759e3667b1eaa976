// Document tree module
// Repository -> folder -> document -> file hierarchy as produced by the connectors


pub mod flatten;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{IndexError, Result};

pub use flatten::HierarchyFlattener;

/// Top-level repository node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    #[serde(rename = "repo_id", alias = "id")]
    pub id: String,
    #[serde(rename = "repo_name", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

/// Folder node; folders may nest arbitrarily deep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(rename = "folder_id", alias = "id")]
    pub id: String,
    #[serde(rename = "folder_name", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

/// Document node, the unit that becomes one flat record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "document_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub files: Vec<File>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "file_name", alias = "name")]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

/// A whole import: the list of repositories handed to the flattener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentTree {
    pub repos: Vec<Repo>,
}

impl DocumentTree {
    #[inline]
    pub fn new(repos: Vec<Repo>) -> Self {
        Self { repos }
    }

    /// Interpret a parsed JSON value as a tree.
    ///
    /// The top level must be either a plain list of repositories or an object
    /// with exactly one key whose value is such a list.
    #[inline]
    pub fn from_value(value: Value) -> Result<Self> {
        let list = match value {
            Value::Array(items) => items,
            Value::Object(map) if map.len() == 1 => {
                let Some((key, inner)) = map.into_iter().next() else {
                    return Err(IndexError::Structure("empty wrapper object".to_string()));
                };
                match inner {
                    Value::Array(items) => items,
                    _ => {
                        return Err(IndexError::Structure(format!(
                            "wrapper key '{}' does not hold a list of repositories",
                            key
                        )));
                    }
                }
            }
            Value::Object(map) => {
                return Err(IndexError::Structure(format!(
                    "top-level object must have exactly one key, found {}",
                    map.len()
                )));
            }
            other => {
                return Err(IndexError::Structure(format!(
                    "top-level value must be a list or a single-keyed object, found {}",
                    value_kind(&other)
                )));
            }
        };

        let repos = list
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value::<Repo>(item).map_err(|e| {
                    IndexError::Structure(format!("repository {} is malformed: {}", index, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { repos })
    }

    #[inline]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| IndexError::Structure(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Total number of document nodes at any depth
    #[inline]
    pub fn document_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&Folder> = self.repos.iter().flat_map(|r| r.folders.iter()).collect();
        while let Some(folder) = stack.pop() {
            count += folder.documents.len();
            stack.extend(folder.folders.iter());
        }
        count
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
