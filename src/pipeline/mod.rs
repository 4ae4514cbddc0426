mod deliver;
mod ingest;
mod runner;

pub use deliver::Deliverer;
pub use ingest::{IngestReport, Ingestor};
pub use runner::Relay;
