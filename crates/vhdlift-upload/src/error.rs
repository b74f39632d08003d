use thiserror::Error;

pub type Result<T> = std::result::Result<T, UploadError>;

/// Errors surfaced by a [`PageStore`](crate::PageStore) implementation.
#[derive(Debug, Error, Clone)]
pub enum PageStoreError {
    #[error("blob not found")]
    NotFound,

    #[error("request failed with HTTP status {status} ({})", .code.as_deref().unwrap_or("no error code"))]
    HttpStatus { status: u16, code: Option<String> },

    #[error("request failed: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl PageStoreError {
    /// Whether a fresh attempt against the store could plausibly succeed.
    ///
    /// Server-side 5xx, request timeouts, throttling, and transport
    /// failures are transient; everything else is treated as fatal for the
    /// run.
    pub fn is_transient(&self) -> bool {
        match self {
            PageStoreError::HttpStatus { status, .. } => {
                (500..=599).contains(status) || *status == 408 || *status == 429
            }
            PageStoreError::Http(_) => true,
            PageStoreError::NotFound
            | PageStoreError::Protocol(_)
            | PageStoreError::InvalidConfig(_) => false,
        }
    }
}

/// Fatal conditions for an upload run.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("virtual disk size {size} bytes is not a multiple of {unit} bytes")]
    SizeConstraint { size: u64, unit: u64 },

    #[error("destination blob already holds a completed upload; use overwrite to replace it")]
    AlreadyUploaded,

    #[error("existing blob carries no upload metadata, so the upload cannot be resumed; use overwrite")]
    CannotResume,

    #[error("local image does not match the remote upload:\n  {}", .0.join("\n  "))]
    MetadataMismatch(Vec<String>),

    #[error("upload of range [{start}, {end}) failed after {attempts} attempt(s): {source}")]
    RangeFailed {
        start: u64,
        end: u64,
        attempts: usize,
        source: PageStoreError,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("byte accounting mismatch after upload: expected {expected} uploaded bytes, counted {counted}")]
    Accounting { expected: u64, counted: u64 },

    #[error(transparent)]
    Disk(#[from] vhdlift_storage::DiskError),

    #[error(transparent)]
    Store(#[from] PageStoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
