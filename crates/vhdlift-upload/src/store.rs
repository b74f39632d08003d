use std::collections::BTreeMap;

use async_trait::async_trait;
use vhdlift_storage::ByteRange;

use crate::PageStoreError;

/// Properties of an existing page blob, as reported by the store.
#[derive(Debug, Clone, Default)]
pub struct BlobProperties {
    pub content_length: u64,
    /// Raw digest bytes of the blob's content-hash property, when set.
    pub content_md5: Option<Vec<u8>>,
    pub metadata: BTreeMap<String, String>,
}

/// One cursor-paginated batch of non-empty page ranges.
///
/// Ranges are half-open; implementations convert from whatever the wire
/// format speaks (the Azure page-range listing is inclusive).
#[derive(Debug, Clone)]
pub struct PageRangeChunk {
    pub ranges: Vec<ByteRange>,
    pub next_marker: Option<String>,
}

/// The page-blob operations the upload pipeline needs, and nothing more.
///
/// The trait is async and object-safe so the uploader can run against the
/// real REST client or an in-process fake in tests. One instance addresses
/// one (container, blob) pair; concurrent `write_pages` calls on disjoint
/// ranges must be safe, which the destination protocol guarantees.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Create the target container. Creating a container that already
    /// exists is not an error.
    async fn create_container(&self) -> Result<(), PageStoreError>;

    /// Create the page blob sized to `size` bytes with the given metadata
    /// attached. `size` must be a multiple of the store's page size.
    async fn create_page_blob(
        &self,
        size: u64,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), PageStoreError>;

    /// Fetch the blob's properties, or `None` when the blob does not exist.
    async fn get_blob_properties(&self) -> Result<Option<BlobProperties>, PageStoreError>;

    /// Set the blob's content-hash property.
    async fn set_content_md5(&self, md5: &[u8; 16]) -> Result<(), PageStoreError>;

    /// Write `data` as pages starting at `offset`. Offset and length must
    /// be page-aligned; rewriting a range with the same bytes is a no-op.
    async fn write_pages(&self, offset: u64, data: &[u8]) -> Result<(), PageStoreError>;

    /// List one batch of non-empty page ranges, continuing from `marker`.
    async fn list_page_ranges(&self, marker: Option<&str>)
        -> Result<PageRangeChunk, PageStoreError>;
}
