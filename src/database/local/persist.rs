// Paired on-disk artifacts for the local store:
// a binary row-major vector table and an Arrow IPC metadata table

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, ListArray, ListBuilder, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::database::Metric;
use crate::record::{FlatRecord, RecordField};
use crate::{IndexError, Result};

const VECTOR_MAGIC: &[u8; 4] = b"DTIV";
const VECTOR_FORMAT_VERSION: u32 = 1;
/// magic + version + metric + dimension + rows
const VECTOR_HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

/// Decoded contents of a vector-table artifact
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTable {
    pub metric: Metric,
    pub dimension: usize,
    pub rows: usize,
    pub values: Vec<f32>,
}

const fn metric_code(metric: Metric) -> u8 {
    match metric {
        Metric::Cosine => 0,
        Metric::InnerProduct => 1,
        Metric::Euclidean => 2,
    }
}

fn metric_from_code(code: u8) -> Result<Metric> {
    match code {
        0 => Ok(Metric::Cosine),
        1 => Ok(Metric::InnerProduct),
        2 => Ok(Metric::Euclidean),
        other => Err(IndexError::CorruptState(format!(
            "unknown metric code {} in vector table",
            other
        ))),
    }
}

/// Sibling path used while writing, renamed over the target when complete
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub(crate) fn write_vectors(
    path: &Path,
    metric: Metric,
    dimension: usize,
    values: &[f32],
) -> Result<()> {
    let rows = if dimension == 0 { 0 } else { values.len() / dimension };
    let dimension_u32 = u32::try_from(dimension)
        .map_err(|_| IndexError::Config(format!("dimension {} is too large", dimension)))?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(VECTOR_MAGIC)?;
    writer.write_all(&VECTOR_FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&[metric_code(metric)])?;
    writer.write_all(&dimension_u32.to_le_bytes())?;
    writer.write_all(&(rows as u64).to_le_bytes())?;
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;

    debug!("Wrote {} vectors to {}", rows, path.display());
    Ok(())
}

pub(crate) fn read_vectors(path: &Path) -> Result<VectorTable> {
    let bytes = fs::read(path)?;
    if bytes.len() < VECTOR_HEADER_LEN || bytes.get(..4) != Some(VECTOR_MAGIC.as_slice()) {
        return Err(IndexError::CorruptState(format!(
            "{} is not a vector table",
            path.display()
        )));
    }

    let version = u32::from_le_bytes(fixed_bytes(&bytes, 4)?);
    if version != VECTOR_FORMAT_VERSION {
        return Err(IndexError::CorruptState(format!(
            "unsupported vector table version {}",
            version
        )));
    }
    let metric = metric_from_code(bytes[8])?;
    let dimension = u32::from_le_bytes(fixed_bytes(&bytes, 9)?) as usize;
    let rows = usize::try_from(u64::from_le_bytes(fixed_bytes(&bytes, 13)?))
        .map_err(|_| IndexError::CorruptState("row count overflows usize".to_string()))?;

    let body = &bytes[VECTOR_HEADER_LEN..];
    let expected_len = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| IndexError::CorruptState("vector table size overflows".to_string()))?;
    if body.len() != expected_len {
        return Err(IndexError::CorruptState(format!(
            "vector table declares {} rows of dimension {} ({} bytes) but holds {} bytes",
            rows,
            dimension,
            expected_len,
            body.len()
        )));
    }

    let values = body
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(VectorTable {
        metric,
        dimension,
        rows,
        values,
    })
}

fn fixed_bytes<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| IndexError::CorruptState("truncated vector table header".to_string()))
}

fn metadata_schema(tags_type: DataType) -> Arc<Schema> {
    let fields: Vec<Field> = RecordField::ALL
        .into_iter()
        .map(|field| {
            let data_type = if field.is_list() {
                tags_type.clone()
            } else {
                DataType::Utf8
            };
            Field::new(field.name(), data_type, field.is_optional())
        })
        .collect();
    Arc::new(Schema::new(fields))
}

pub(crate) fn write_metadata(path: &Path, records: &[FlatRecord]) -> Result<()> {
    let text_column = |extract: fn(&FlatRecord) -> Option<&str>| -> ArrayRef {
        Arc::new(StringArray::from(
            records.iter().map(extract).collect::<Vec<_>>(),
        ))
    };

    let mut tags_builder = ListBuilder::new(StringBuilder::new());
    for record in records {
        match &record.tags {
            Some(tags) => {
                for tag in tags {
                    tags_builder.values().append_value(tag);
                }
                tags_builder.append(true);
            }
            None => tags_builder.append(false),
        }
    }
    let tags: ArrayRef = Arc::new(tags_builder.finish());

    let columns: Vec<ArrayRef> = vec![
        text_column(|r| Some(r.document_id.as_str())),
        text_column(|r| Some(r.repo_id.as_str())),
        text_column(|r| Some(r.repo_name.as_str())),
        text_column(|r| Some(r.folder_id.as_str())),
        text_column(|r| Some(r.folder_name.as_str())),
        text_column(|r| Some(r.title.as_str())),
        text_column(|r| r.author.as_deref()),
        Arc::clone(&tags),
        text_column(|r| r.category.as_deref()),
        text_column(|r| r.content.as_deref()),
        text_column(|r| r.files_content.as_deref()),
    ];

    let schema = metadata_schema(tags.data_type().clone());
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns).map_err(|e| {
        IndexError::CorruptState(format!("Failed to create metadata record batch: {}", e))
    })?;

    let file = BufWriter::new(File::create(path)?);
    let mut writer = FileWriter::try_new(file, &schema).map_err(|e| {
        IndexError::CorruptState(format!("Failed to open metadata writer: {}", e))
    })?;
    writer
        .write(&batch)
        .map_err(|e| IndexError::CorruptState(format!("Failed to write metadata: {}", e)))?;
    writer
        .finish()
        .map_err(|e| IndexError::CorruptState(format!("Failed to finish metadata: {}", e)))?;

    debug!("Wrote {} metadata rows to {}", records.len(), path.display());
    Ok(())
}

pub(crate) fn read_metadata(path: &Path) -> Result<Vec<FlatRecord>> {
    let file = BufReader::new(File::open(path)?);
    let reader = FileReader::try_new(file, None).map_err(|e| {
        IndexError::CorruptState(format!(
            "{} is not a metadata table: {}",
            path.display(),
            e
        ))
    })?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| {
            IndexError::CorruptState(format!("Failed to read metadata batch: {}", e))
        })?;
        records.extend(parse_metadata_batch(&batch)?);
    }
    Ok(records)
}

fn string_column<'a>(batch: &'a RecordBatch, field: RecordField) -> Result<&'a StringArray> {
    batch
        .column_by_name(field.name())
        .ok_or_else(|| IndexError::CorruptState(format!("Missing {} column", field)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::CorruptState(format!("Invalid {} column type", field)))
}

fn required(column: &StringArray, row: usize) -> String {
    column.value(row).to_string()
}

fn optional(column: &StringArray, row: usize) -> Option<String> {
    if column.is_null(row) {
        None
    } else {
        Some(column.value(row).to_string())
    }
}

fn parse_metadata_batch(batch: &RecordBatch) -> Result<Vec<FlatRecord>> {
    let document_ids = string_column(batch, RecordField::DocumentId)?;
    let repo_ids = string_column(batch, RecordField::RepoId)?;
    let repo_names = string_column(batch, RecordField::RepoName)?;
    let folder_ids = string_column(batch, RecordField::FolderId)?;
    let folder_names = string_column(batch, RecordField::FolderName)?;
    let titles = string_column(batch, RecordField::Title)?;
    let authors = string_column(batch, RecordField::Author)?;
    let categories = string_column(batch, RecordField::Category)?;
    let contents = string_column(batch, RecordField::Content)?;
    let files_contents = string_column(batch, RecordField::FilesContent)?;
    let tags = batch
        .column_by_name(RecordField::Tags.name())
        .ok_or_else(|| IndexError::CorruptState("Missing tags column".to_string()))?
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| IndexError::CorruptState("Invalid tags column type".to_string()))?;

    (0..batch.num_rows())
        .map(|row| {
            let row_tags = if tags.is_null(row) {
                None
            } else {
                let values = tags.value(row);
                let strings = values
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| IndexError::CorruptState("Invalid tag values".to_string()))?;
                Some(
                    (0..strings.len())
                        .map(|i| strings.value(i).to_string())
                        .collect(),
                )
            };

            Ok(FlatRecord {
                document_id: required(document_ids, row),
                repo_id: required(repo_ids, row),
                repo_name: required(repo_names, row),
                folder_id: required(folder_ids, row),
                folder_name: required(folder_names, row),
                title: required(titles, row),
                author: optional(authors, row),
                tags: row_tags,
                category: optional(categories, row),
                content: optional(contents, row),
                files_content: optional(files_contents, row),
            })
        })
        .collect()
}
