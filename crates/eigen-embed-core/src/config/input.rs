//! Input and output file locations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};

/// Paths of the vocabulary, the cooccurrence binary, and the output vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Vocabulary file: `<word> <frequency>` per line.
    #[serde(default = "default_vocab")]
    pub vocab: PathBuf,

    /// Cooccurrence binary: 16-byte `(i32, i32, f64)` records.
    #[serde(default = "default_cooccurrence")]
    pub cooccurrence: PathBuf,

    /// Output file for the embedding vectors.
    #[serde(default = "default_vectors")]
    pub vectors: PathBuf,
}

fn default_vocab() -> PathBuf {
    PathBuf::from("vocab.txt")
}

fn default_cooccurrence() -> PathBuf {
    PathBuf::from("cooccurrence.shuf.bin")
}

fn default_vectors() -> PathBuf {
    PathBuf::from("vectors.txt")
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            vocab: default_vocab(),
            cooccurrence: default_cooccurrence(),
            vectors: default_vectors(),
        }
    }
}

impl InputConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if any path is empty
    pub fn validate(&self) -> EmbedResult<()> {
        for (name, path) in [
            ("vocab", &self.vocab),
            ("cooccurrence", &self.cooccurrence),
            ("vectors", &self.vectors),
        ] {
            if path.as_os_str().is_empty() {
                return Err(EmbedError::invalid_configuration(format!(
                    "{} path cannot be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}
