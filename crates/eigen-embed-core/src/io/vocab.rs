//! Vocabulary file: one `<word> <count>` pair per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::{EmbedError, EmbedResult};

/// Words in row order with their raw corpus counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vocabulary {
    words: Vec<String>,
    counts: Vec<i64>,
}

impl Vocabulary {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let (words, counts) = pairs.into_iter().map(|(w, c)| (w.into(), c)).unzip();
        Self { words, counts }
    }

    /// Read a vocabulary file. Blank lines are skipped; every other line must
    /// hold exactly two whitespace-separated fields, the second an integer.
    ///
    /// # Errors
    /// - `Io` if the file cannot be opened or read
    /// - `MalformedFile` with the 1-based line number otherwise
    pub fn load(path: impl AsRef<Path>) -> EmbedResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EmbedError::io(path, e))?;
        let reader = BufReader::new(file);

        let mut words = Vec::new();
        let mut counts = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| EmbedError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                return Err(EmbedError::malformed(
                    path,
                    format!("line {}: expected '<word> <count>', got {} fields", idx + 1, fields.len()),
                ));
            }
            let count = fields[1].parse::<i64>().map_err(|e| {
                EmbedError::malformed(
                    path,
                    format!("line {}: count '{}' is not an integer: {}", idx + 1, fields[1], e),
                )
            })?;
            words.push(fields[0].to_string());
            counts.push(count);
        }

        info!(n = words.len(), path = %path.display(), "Loaded vocabulary");
        Ok(Self { words, counts })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn word(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_pairs_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 10").unwrap();
        writeln!(file, "dog 5").unwrap();
        writeln!(file).unwrap();
        let vocab = Vocabulary::load(file.path()).unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.word(0), Some("cat"));
        assert_eq!(vocab.counts(), &[10, 5]);
    }

    #[test]
    fn test_wrong_field_count_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat 10").unwrap();
        writeln!(file, "hot dog 5").unwrap();
        let err = Vocabulary::load(file.path()).unwrap_err();
        assert!(matches!(err, EmbedError::MalformedFile { .. }));
        assert!(err.to_string().contains("line 2"), "got: {}", err);
    }

    #[test]
    fn test_non_integer_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat ten").unwrap();
        assert!(matches!(
            Vocabulary::load(file.path()),
            Err(EmbedError::MalformedFile { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Vocabulary::load(dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, EmbedError::Io { .. }));
    }
}
