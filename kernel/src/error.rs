//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`DeltaResult`]. Environmental failures
//! (storage I/O, JSON decode) are always wrapped via `#[from]`, never swallowed, per the policy in
//! spec §7.

use crate::table_features::{ReaderFeature, WriterFeature};
use crate::Version;

pub type DeltaResult<T, E = Error> = Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // --- Usage errors -----------------------------------------------------
    #[error("table already exists at {0}")]
    TableAlreadyExists(String),

    #[error("a schema must be provided when creating a table that does not already exist")]
    SchemaNotProvided,

    #[error("cannot CREATE a managed table at a non-empty location: {0}")]
    CreateTableWithNonEmptyLocation(String),

    #[error("cannot CREATE an external table without schema unless a log already exists at {0}")]
    CreateExternalWithoutLog(String),

    #[error("REPLACE requires an existing table on disk at {0}")]
    ReplaceTableNotFound(String),

    #[error("the existing table's schema differs from the provided schema")]
    DifferentSchema,

    #[error("the existing table's partition columns differ from the provided partition columns")]
    DifferentPartitioning,

    #[error("the existing table's clustering columns differ from the provided clustering columns")]
    DifferentClustering,

    #[error("the existing table's properties differ from the provided properties: {0}")]
    DifferentProperties(String),

    #[error("domain metadata entry '{0}' does not exist and cannot be removed")]
    DomainDoesNotExist(String),

    #[error("cannot overwrite schema of an existing table without explicit opt-in")]
    IllegalOverwriteSchema,

    #[error("cannot replace a clustered table with a partitioned table (or vice versa)")]
    ReplacingClusteredWithPartitioned,

    #[error("domain '{0}' is reserved for internal use and is not user-controlled")]
    ReservedDomain(String),

    #[error("domain metadata requires the domainMetadata writer table feature")]
    DomainMetadataFeatureRequired,

    #[error("row-id high watermark must be non-negative, got {0}")]
    NegativeRowIdWatermark(i64),

    // --- Integrity errors ---------------------------------------------------
    #[error("log has a gap: expected version {expected} but found {found}")]
    LogGap { expected: Version, found: Version },

    #[error("duplicate domain metadata entry for domain '{0}' in a single commit")]
    DuplicateDomainMetadata(String),

    #[error("domain '{0}' was tombstoned twice in the same commit")]
    DuplicateDomainTombstone(String),

    #[error("action record must have exactly one non-null variant, found {0}")]
    MalformedActionRecord(usize),

    // --- Concurrency errors (from the conflict resolver) --------------------
    #[error("a concurrent transaction changed the protocol at version {0}")]
    ProtocolChanged(Version),

    #[error("a concurrent transaction changed the metadata at version {0}")]
    MetadataChanged(Version),

    #[error("a concurrent transaction with app id '{app_id}' already committed version {committed_version} (>= {attempted_version})")]
    ConcurrentTransaction {
        app_id: String,
        committed_version: Version,
        attempted_version: Version,
    },

    #[error("a concurrent transaction modified domain metadata '{0}' in a way that cannot be rebased")]
    ConcurrentDomainMetadata(String),

    #[error("transaction could not be committed after {0} retries due to concurrent writers")]
    ConcurrentWriteException(u32),

    #[error("transaction was already attempted and cannot be retried; build a new transaction")]
    TransactionAlreadyAttempted,

    // --- Compat errors --------------------------------------------------------
    #[error("iceberg compatibility {version} requires property '{key}' to be '{expected}'")]
    IncompatibleProperty {
        version: &'static str,
        key: String,
        expected: String,
    },

    #[error("type {0} is not allowed under the active iceberg compatibility mode")]
    UnsupportedType(String),

    #[error("partition column '{0}' has a type that is not allowed under the active iceberg compatibility mode")]
    UnsupportedPartitionType(String),

    #[error("type widening from {from} to {to} is not legal under the active iceberg compatibility mode")]
    UnsupportedTypeWidening { from: String, to: String },

    #[error("iceberg compatibility {version} requires protocol feature(s): {missing:?}")]
    RequiredFeatureMissing {
        version: &'static str,
        missing: Vec<String>,
    },

    #[error("cannot enable iceberg compatibility {0} on an existing table")]
    EnablingCompatOnExistingTable(&'static str),

    #[error("cannot disable iceberg compatibility {0} on an existing table")]
    DisablingCompatOnExistingTable(&'static str),

    #[error("more than one iceberg compatibility version is enabled at once")]
    MultipleIcebergCompatVersionsEnabled,

    #[error("numRecords statistics are required under the active iceberg compatibility mode")]
    MissingNumRecordsStats,

    // --- Protocol / feature support -------------------------------------------
    #[error("reader features required but not supported: {0:?}")]
    UnsupportedReaderFeatures(Vec<ReaderFeature>),

    #[error("writer features required but not supported: {0:?}")]
    UnsupportedWriterFeatures(Vec<WriterFeature>),

    #[error("append-only table cannot accept a remove action with dataChange=true")]
    CannotModifyAppendOnlyTable,

    #[error("the commit is missing required commit info")]
    MissingCommitInfo,

    #[error("this transaction has already been closed (committed or failed)")]
    TransactionClosed,

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("a file already exists at the target commit path")]
    FileAlreadyExists,

    // --- Environmental / wrapped errors ---------------------------------------
    #[error("storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl Into<String>) -> Self {
        Error::Generic(msg.into())
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Error::InvalidSchema(msg.into())
    }
}
