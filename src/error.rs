use thiserror::Error;

/// Failures a resolution run can report.
///
/// Only `ConfigurationMissing` and `CatalogUnavailable` abort a run. The
/// delegate variants degrade to an empty selection inside the engine, and
/// `ChangeSetUnavailable` is recovered by each frontend in its own way.
#[derive(Debug, Error)]
pub enum ImpactError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("change set unavailable: {0}")]
    ChangeSetUnavailable(#[from] ChangeSetError),

    #[error("test catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("reasoning delegate unavailable: {0}")]
    DelegateUnavailable(String),

    #[error("reasoning delegate reply malformed: {0}")]
    DelegateMalformed(String),
}

/// The three outcomes a caller of the change-set provider must be able to
/// tell apart.
#[derive(Debug, Error)]
pub enum ChangeSetError {
    /// Unknown commit, unknown repository or a rejected credential.
    #[error("hosting API rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("hosting API unreachable: {0}")]
    Network(String),

    /// Empty commit, merge commit, or a commit the API reports without files.
    #[error("commit {0} lists no changed files")]
    NoFiles(String),
}
