//! Input identifier loading and output materialization.

mod dedup;
mod output;

pub use dedup::{load_identifiers, read_identifiers, unique_identifiers, DEFAULT_ID_COLUMN};
pub use output::{
    output_path, write_artifact, Artifact, ReplyArchive, RunId, ThresholdRow, ThresholdTable,
};
