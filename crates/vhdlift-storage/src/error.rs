use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

/// Unified error type for image decoding and stream reads.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("corrupt disk image: {0}")]
    CorruptImage(&'static str),

    #[error("unsupported disk image feature: {0}")]
    Unsupported(&'static str),

    #[error("parent chain exceeds {max} images")]
    ParentChainTooDeep { max: usize },

    #[error("parent image could not be resolved: {0}")]
    ParentNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
