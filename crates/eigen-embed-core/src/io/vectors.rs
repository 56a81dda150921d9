//! Embedding text file: `<word> <v1> ... <vdim>` per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use tracing::info;

use crate::error::{EmbedError, EmbedResult};

/// Write one line per row of `embedding`, labelled by `words`.
///
/// Values use the shortest representation that parses back to the same f64.
///
/// # Errors
/// - `DimensionMismatch` if `words` and the embedding rows differ in count
/// - `Io` if the file cannot be written
pub fn write_embedding(
    path: impl AsRef<Path>,
    words: &[String],
    embedding: &Tensor,
) -> EmbedResult<()> {
    let path = path.as_ref();
    let begin = Instant::now();
    let (n, dim) = embedding.dims2()?;
    if n != words.len() {
        return Err(EmbedError::dimension_mismatch(words.len(), n));
    }
    let rows = embedding
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .to_vec2::<f64>()?;

    let file = File::create(path).map_err(|e| EmbedError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (word, row) in words.iter().zip(rows.iter()) {
        let mut line = String::with_capacity(word.len() + dim * 20);
        line.push_str(word);
        for v in row {
            line.push(' ');
            line.push_str(&v.to_string());
        }
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .map_err(|e| EmbedError::io(path, e))?;
    }
    writer.flush().map_err(|e| EmbedError::io(path, e))?;

    info!(
        n,
        dim,
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Saving embeddings"
    );
    Ok(())
}

/// Parse a file written by [`write_embedding`] into words and an n x dim f64
/// tensor on the host.
///
/// # Errors
/// - `Io` if the file cannot be read
/// - `MalformedFile` on an unparsable value or rows of different length
pub fn read_embedding(path: impl AsRef<Path>) -> EmbedResult<(Vec<String>, Tensor)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| EmbedError::io(path, e))?;

    let mut words = Vec::new();
    let mut values = Vec::new();
    let mut dim = None;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EmbedError::io(path, e))?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        let row = fields
            .map(|f| {
                f.parse::<f64>().map_err(|e| {
                    EmbedError::malformed(path, format!("line {}: '{}': {}", idx + 1, f, e))
                })
            })
            .collect::<EmbedResult<Vec<f64>>>()?;
        match dim {
            None => dim = Some(row.len()),
            Some(d) if d != row.len() => {
                return Err(EmbedError::malformed(
                    path,
                    format!("line {}: expected {} values, got {}", idx + 1, d, row.len()),
                ))
            }
            Some(_) => {}
        }
        words.push(word.to_string());
        values.extend(row);
    }

    let n = words.len();
    let embedding = Tensor::from_vec(values, (n, dim.unwrap_or(0)), &Device::Cpu)?;
    Ok((words, embedding))
}
