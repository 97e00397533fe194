pub mod questdb_ilp;

pub use questdb_ilp::{IngestCounts, QuestDbIlpReadingSink};
