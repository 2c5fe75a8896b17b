//! Link processing pipeline.
//!
//! - `ingest`: cursor-tracked polling and event dedup
//! - `classify`: raw metadata to `MediaDescriptor`
//! - `acquire`: download ladder and image fetching
//! - `deliver`: upload, announce and fallback
//! - `process`: the per-link state machine
//! - `run`: event dispatch and the polling loop
//! - `retry`: backoff primitive shared by the network steps

pub mod acquire;
pub mod classify;
pub mod deliver;
pub mod ingest;
pub mod process;
pub mod retry;
pub mod run;

pub use acquire::{AcquisitionEngine, AcquisitionOutcome};
pub use classify::classify;
pub use deliver::{DeliveryEngine, resolve_token};
pub use ingest::{ProcessedEventSet, UpdateIngestor};
pub use process::{LinkProcessor, LinkReport, LinkState, ProcessOptions};
pub use retry::{RetryError, RetryPolicy, retry};
pub use run::{Disposition, RelayContext, RunOptions, run};
