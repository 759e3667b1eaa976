// Embeddings module
// The text -> vector port the pipeline depends on, and record embedding on top of it


pub mod ollama;

use serde::Serialize;
use tracing::{debug, warn};

use crate::Result;
use crate::record::{FlatRecord, render_all};

pub use ollama::OllamaClient;

/// Black-box embedding function: text in, fixed-length vector out
pub trait EmbeddingPort: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode several texts; output order matches input order
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// A record that could not be embedded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingFailure {
    pub ordinal: usize,
    pub document_id: String,
    pub message: String,
}

/// Vectors aligned with the input records; failed rows hold an empty vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub failures: Vec<EmbeddingFailure>,
}

impl EmbeddingOutcome {
    #[inline]
    pub fn embedded(&self) -> usize {
        self.vectors.len() - self.failures.len()
    }
}

/// Embed every record's rendering, `batch_size` texts per call
#[inline]
pub fn embed_records<P>(
    port: &P,
    records: &[FlatRecord],
    batch_size: usize,
    dimension: usize,
) -> EmbeddingOutcome
where
    P: EmbeddingPort + ?Sized,
{
    embed_records_with_progress(port, records, batch_size, dimension, |_| {})
}

/// As [`embed_records`], reporting the number of processed records after
/// each batch.
///
/// A failed batch is retried one record at a time; records that still fail,
/// or come back with the wrong length, keep an empty vector and are listed in
/// [`EmbeddingOutcome::failures`].
#[inline]
pub fn embed_records_with_progress<P, F>(
    port: &P,
    records: &[FlatRecord],
    batch_size: usize,
    dimension: usize,
    mut on_progress: F,
) -> EmbeddingOutcome
where
    P: EmbeddingPort + ?Sized,
    F: FnMut(usize),
{
    let texts = render_all(records);
    let mut outcome = EmbeddingOutcome {
        vectors: vec![Vec::new(); records.len()],
        failures: Vec::new(),
    };

    let mut offset = 0;
    for chunk in texts.chunks(batch_size.max(1)) {
        match port.encode_batch(chunk) {
            Ok(batch) if batch.len() == chunk.len() => {
                for (i, vector) in batch.into_iter().enumerate() {
                    accept(&mut outcome, records, offset + i, Ok(vector), dimension);
                }
            }
            result => {
                match result {
                    Ok(batch) => warn!(
                        "Embedding batch returned {} vectors for {} texts; retrying individually",
                        batch.len(),
                        chunk.len()
                    ),
                    Err(e) => warn!(
                        "Embedding batch of {} failed: {}; retrying individually",
                        chunk.len(),
                        e
                    ),
                }
                for (i, text) in chunk.iter().enumerate() {
                    accept(&mut outcome, records, offset + i, port.encode(text), dimension);
                }
            }
        }

        offset += chunk.len();
        debug!("Embedded {}/{} records", offset, records.len());
        on_progress(offset);
    }

    outcome
}

fn accept(
    outcome: &mut EmbeddingOutcome,
    records: &[FlatRecord],
    ordinal: usize,
    result: Result<Vec<f32>>,
    dimension: usize,
) {
    let message = match result {
        Ok(vector) if vector.len() == dimension => {
            outcome.vectors[ordinal] = vector;
            return;
        }
        Ok(vector) => format!(
            "embedding has dimension {}, expected {}",
            vector.len(),
            dimension
        ),
        Err(e) => e.to_string(),
    };

    let document_id = records[ordinal].document_id.clone();
    warn!("Could not embed document {}: {}", document_id, message);
    outcome.failures.push(EmbeddingFailure {
        ordinal,
        document_id,
        message,
    });
}
