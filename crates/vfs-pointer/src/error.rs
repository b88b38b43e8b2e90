#[derive(Debug, thiserror::Error)]
pub enum PointerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pointer used after disposal: {0}")]
    Disposed(String),

    #[error("Pointer already disposed: {0}")]
    AlreadyDisposed(String),

    #[error("Pointer handle does not own a lease: {0}")]
    NotOwned(String),

    #[error("Scope already disposed: {0}")]
    ScopeDisposed(String),

    #[error("Container already disposed (created in {0})")]
    ContainerDisposed(String),

    #[error("Event batch already in progress")]
    BatchInProgress,

    #[error("No event batch in progress")]
    NoPendingBatch,

    #[error("Event batch mismatch: before() saw {before} events, after() got {after}")]
    BatchMismatch { before: usize, after: usize },

    #[error("Unknown listener: {0}")]
    UnknownListener(u32),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Path already exists: {0}")]
    PathExists(String),

    #[error("Unknown file {file} in filesystem {protocol}")]
    UnknownFile { protocol: String, file: u64 },

    #[error("{count} pointer(s) not disposed, first: {url} (created in {origin})")]
    Leaked {
        count: usize,
        url: String,
        origin: String,
    },

    #[error("{count} container(s) not disposed, first created in {origin}")]
    LeakedContainers { count: usize, origin: String },

    #[error("Index structure corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, PointerError>;

/// Shorthand for structural check failures.
pub(crate) fn corrupted(message: impl Into<String>) -> PointerError {
    PointerError::Corrupted(message.into())
}
