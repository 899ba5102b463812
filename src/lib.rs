#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Idempotence audit of the canonicalizer.
pub mod audit;
/// Canonicalization and fingerprint collaborators.
pub mod chem;
/// Command-line entry point and logging setup.
pub mod cli;
/// Store settings, dataset manifests, and pipeline options.
pub mod config;
/// Centralized constants used across the pipeline, store, and outputs.
pub mod constants;
/// Store-backed deduplication and new-polymer staging.
pub mod dedup;
/// Column-oriented record builder and JSONL/CSV writers.
pub mod frame;
/// Polymer name list export.
pub mod namelist;
/// Batch pipeline driver.
pub mod pipeline;
/// CSV input.
pub mod source;
/// Persisted store interfaces and backends.
pub mod store;
/// Shared type aliases.
pub mod types;

mod errors;

pub use audit::{AuditReport, IdempotenceAuditor, IdempotenceCheck, recheck_file};
pub use chem::{
    Canonicalizer, CommandCanonicalizer, CommandFingerprinter, ExternalCommand, Fingerprint,
    Fingerprinter, InMemoryCanonicalizer,
};
pub use config::{
    DatasetSpec, PipelineOptions, PostgresSettings, PrepareManifest, PropertyDef,
    PropertyErrorPolicy, SelectionSource, StoreSettings,
};
pub use dedup::{Deduplicator, PropertyLookup, Resolution};
pub use errors::{PipelineError, StoreError};
pub use frame::{Cell, Frame, FrameRow, FrameSchema};
pub use namelist::export_names;
pub use pipeline::{DatasetBatches, DatasetReport, Pipeline, PrepareReport};
pub use source::{CsvRow, CsvSource};
pub use store::{
    Criteria, MemoryStore, PostgresStore, RecordStore, SqliteStore, StoreContext, StoredRow,
    Table,
};
pub use types::{CanonicalSmiles, ColumnName, DatasetId, HpId, PropId, RawSmiles, ShortName};
