//! File formats read and written around the solver core.

mod cooccurrence;
mod vectors;
mod vocab;

pub use cooccurrence::{load_cooccurrence, write_cooccurrence, CooccurrenceRecord, RECORD_BYTES};
pub use vectors::{read_embedding, write_embedding};
pub use vocab::Vocabulary;
