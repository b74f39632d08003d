//! Range planning and resumable page-blob upload for vhdlift.
//!
//! The pipeline turns a [`DiskStream`](vhdlift_storage::DiskStream)'s
//! sparse allocated ranges into an upload plan (page-aligned, page-set
//! bounded, resume ranges subtracted, all-zero ranges dropped) and drives
//! it against a remote page store with a bounded worker pool:
//!
//! - [`PageStore`]: the six store operations the pipeline needs; the REST
//!   implementation is [`AzurePageStore`], tests inject fakes
//! - [`reconcile`]: fresh-vs-resume decision with metadata validation
//! - [`locate_uploadable_ranges`] / [`detect_empty_ranges`] / [`UploadPlan`]
//! - [`upload`]: parallel, retrying, cancel-on-first-error execution

mod azure;
mod error;
mod metadata;
mod plan;
mod reconcile;
mod store;
mod upload;

pub use azure::AzurePageStore;
pub use error::{PageStoreError, Result, UploadError};
pub use metadata::{UploadMetadata, BLOB_METADATA_KEY};
pub use plan::{
    detect_empty_ranges, locate_uploadable_ranges, PlanConfig, UploadPlan, DEFAULT_PAGE_SET_SIZE,
    DEFAULT_PAGE_SIZE,
};
pub use reconcile::{reconcile, Reconciliation};
pub use store::{BlobProperties, PageRangeChunk, PageStore};
pub use upload::{upload, UploadContext, UploadProgress, DEFAULT_MAX_ATTEMPTS};
