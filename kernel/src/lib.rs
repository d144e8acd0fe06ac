//! `delta_txn_kernel`: the Delta Lake transaction core, decoupled from the read/scan path.
//!
//! This crate owns the commit pipeline, optimistic-concurrency conflict resolution, domain
//! metadata, the Iceberg-compatibility rule engine, and the create/replace planner. It does not
//! read table data, compute file statistics, or evaluate expressions; those concerns live with
//! an external query engine that implements the [`engine::Engine`] trait.

mod actions;
mod conflict_checker;
mod create_replace;
mod domain_metadata;
mod error;
pub mod engine;
mod iceberg_compat;
mod log_segment;
mod path;
mod post_commit;
mod row_tracking;
pub mod schema;
mod snapshot;
mod table_configuration;
mod table_features;
mod transaction;

pub use actions::{
    Action, ActionRecord, Add, CommitInfo, CrcInfo, DomainMetadata, Format, Metadata, Protocol,
    Remove, Txn, CLUSTERING_DOMAIN, KERNEL_VERSION, ROW_TRACKING_DOMAIN, SYSTEM_DOMAIN_PREFIX,
};
pub use conflict_checker::{ConflictChecker, RebaseState, WinningCommitSummary};
pub use create_replace::{CreateOrReplaceTableBuilder, TableCreationMode};
pub use domain_metadata::DomainMetadataState;
pub use error::{DeltaResult, Error};
pub use iceberg_compat::IcebergCompatVersion;
pub use log_segment::LogSegment;
pub use path::ParsedLogPath;
pub use post_commit::{run_post_commit_hooks, PostCommitReport};
pub use snapshot::Snapshot;
pub use table_configuration::{TableConfiguration, TableProperties};
pub use table_features::{ColumnMappingMode, ReaderFeature, WriterFeature};
pub use transaction::{CommitResult, Transaction, TransactionOptions};

/// A table version. `-1` denotes "no commits yet" (an uninitialized log), matching the protocol's
/// own convention; every other value is the zero-indexed commit/checkpoint version.
pub type Version = i64;

/// The version of an as-yet-uncommitted table.
pub const UNINITIALIZED_VERSION: Version = -1;
