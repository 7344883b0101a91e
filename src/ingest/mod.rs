//! Ingest lane: block adapter, offset-anchored consumer session, and the
//! baton-ordered decode workers that feed the dispatcher.

mod adapter;
mod ingestor;

pub use adapter::BlockAdapter;
pub use ingestor::{IngestError, IngestStats, Ingestor, RawMsg};
