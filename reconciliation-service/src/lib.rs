pub mod aggregate;
pub mod charges;
pub mod config;
pub mod export;
pub mod nem12;
pub mod observability;
pub mod pipeline;
pub mod reconcile;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};
