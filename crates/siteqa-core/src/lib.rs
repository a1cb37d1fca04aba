pub mod config;
pub mod error;
pub mod ingest;
pub mod traits;
pub mod types;

pub use config::Settings;
pub use error::{ErrorKind, ModelError};
pub use types::{Answer, Candidate, Chunk, Intent, Metric, QueryContext, RankedCandidate, Stage, Verdict};
