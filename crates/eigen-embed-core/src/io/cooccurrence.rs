//! Binary cooccurrence file.
//!
//! Each record is 16 bytes, little-endian: `i32` row, `i32` column (both
//! 1-indexed), `f64` value. Loading converts to 0-indexed coordinates and sums
//! duplicate pairs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use tracing::info;

use crate::error::{EmbedError, EmbedResult};
use crate::sparse::SparseMatrix;

/// Size of one record on disk.
pub const RECORD_BYTES: usize = std::mem::size_of::<CooccurrenceRecord>();

/// One on-disk record. Fields hold little-endian bit patterns; use
/// [`CooccurrenceRecord::to_native`] and [`CooccurrenceRecord::to_le`] to
/// convert from and to native values.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CooccurrenceRecord {
    /// 1-indexed row.
    pub row: i32,
    /// 1-indexed column.
    pub col: i32,
    pub value: f64,
}

impl CooccurrenceRecord {
    pub fn new(row: i32, col: i32, value: f64) -> Self {
        Self { row, col, value }
    }

    /// Native record from its on-disk form.
    pub fn to_native(self) -> Self {
        Self {
            row: i32::from_le(self.row),
            col: i32::from_le(self.col),
            value: f64::from_bits(u64::from_le(self.value.to_bits())),
        }
    }

    /// On-disk form of a native record.
    pub fn to_le(self) -> Self {
        Self {
            row: self.row.to_le(),
            col: self.col.to_le(),
            value: f64::from_bits(self.value.to_bits().to_le()),
        }
    }
}

const _: () = assert!(RECORD_BYTES == 16);

/// Load an `n x n` cooccurrence matrix.
///
/// # Errors
/// - `Io` if the file cannot be read
/// - `MalformedFile` if the size is not a multiple of 16 or an index falls
///   outside `1..=n`
pub fn load_cooccurrence(path: impl AsRef<Path>, n: usize) -> EmbedResult<SparseMatrix> {
    let path = path.as_ref();
    let begin = Instant::now();

    let file = File::open(path).map_err(|e| EmbedError::io(path, e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| EmbedError::io(path, e))?;
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(EmbedError::malformed(
            path,
            format!(
                "size {} bytes is not a multiple of the {}-byte record size",
                bytes.len(),
                RECORD_BYTES
            ),
        ));
    }

    let records = bytes.len() / RECORD_BYTES;
    let mut triplets = Vec::with_capacity(records);
    for (idx, record) in bytes.chunks_exact(RECORD_BYTES).enumerate() {
        let CooccurrenceRecord { row, col, value } =
            pod_read_unaligned::<CooccurrenceRecord>(record).to_native();

        let row = to_zero_based(row, n).ok_or_else(|| out_of_range(path, idx, "row", row, n))?;
        let col = to_zero_based(col, n).ok_or_else(|| out_of_range(path, idx, "column", col, n))?;
        triplets.push((row, col, value));
    }

    let matrix = SparseMatrix::from_triplets(n, triplets)?;
    info!(
        n,
        records,
        nnz = matrix.nnz(),
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Loaded cooccurrence matrix"
    );
    Ok(matrix)
}

/// Write records in the on-disk format. Indices are written as given
/// (1-indexed).
pub fn write_cooccurrence(
    path: impl AsRef<Path>,
    records: &[(i32, i32, f64)],
) -> EmbedResult<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| EmbedError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for &(row, col, value) in records {
        let record = CooccurrenceRecord::new(row, col, value).to_le();
        writer
            .write_all(bytes_of(&record))
            .map_err(|e| EmbedError::io(path, e))?;
    }
    writer.flush().map_err(|e| EmbedError::io(path, e))
}

fn to_zero_based(index: i32, n: usize) -> Option<usize> {
    if index < 1 || index as usize > n {
        None
    } else {
        Some(index as usize - 1)
    }
}

fn out_of_range(path: &Path, record: usize, field: &str, value: i32, n: usize) -> EmbedError {
    EmbedError::malformed(
        path,
        format!(
            "record {}: {} index {} outside 1..={}",
            record, field, value, n
        ),
    )
}
