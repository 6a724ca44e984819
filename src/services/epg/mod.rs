//! Programme guide (XMLTV) ingestion

pub mod guide;
pub mod ingestor;
pub mod sources;
pub mod state_machine;
pub mod time;
pub mod xml_events;

pub use ingestor::EpgIngestor;
pub use sources::{HttpFetcher, SourceInput};
