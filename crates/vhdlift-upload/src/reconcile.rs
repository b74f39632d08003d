use vhdlift_storage::RangeSet;

use crate::{PageStore, UploadError, UploadMetadata};

/// Outcome of comparing local state against the destination blob.
#[derive(Debug)]
pub enum Reconciliation {
    /// The blob does not exist (or is being overwritten); the caller must
    /// create it sized to the virtual disk with the local metadata attached.
    Fresh,
    /// A compatible interrupted upload exists; `skip` holds the page
    /// ranges the destination already has.
    Resume { skip: RangeSet },
}

/// Decide whether this run starts fresh or resumes, and with which
/// skip-list.
///
/// An existing blob without overwrite must carry a matching upload
/// metadata record: a set content hash means a completed upload
/// ([`UploadError::AlreadyUploaded`]), a missing record means resume is
/// impossible ([`UploadError::CannotResume`]), and any metadata mismatch
/// is fatal with every differing field listed. Only a full match proceeds
/// to draining the store's page-range cursor into the skip set.
pub async fn reconcile(
    store: &dyn PageStore,
    local: &UploadMetadata,
    overwrite: bool,
) -> Result<Reconciliation, UploadError> {
    let Some(properties) = store.get_blob_properties().await? else {
        return Ok(Reconciliation::Fresh);
    };

    if overwrite {
        tracing::info!("existing blob will be overwritten");
        return Ok(Reconciliation::Fresh);
    }

    if properties
        .content_md5
        .as_ref()
        .is_some_and(|digest| !digest.is_empty())
    {
        return Err(UploadError::AlreadyUploaded);
    }

    let remote = UploadMetadata::from_blob_metadata(&properties.metadata)
        .map_err(|_| UploadError::CannotResume)?
        .ok_or(UploadError::CannotResume)?;

    let mismatches = local.compare(&remote);
    if !mismatches.is_empty() {
        return Err(UploadError::MetadataMismatch(mismatches));
    }

    let mut skip = RangeSet::new();
    let mut marker: Option<String> = None;
    loop {
        let chunk = store.list_page_ranges(marker.as_deref()).await?;
        for range in chunk.ranges {
            skip.insert(range.start, range.end);
        }
        match chunk.next_marker {
            Some(next) if !next.is_empty() => marker = Some(next),
            _ => break,
        }
    }

    tracing::info!(
        skipped_bytes = skip.total_len(),
        skipped_ranges = skip.ranges().len(),
        "resuming interrupted upload"
    );
    Ok(Reconciliation::Resume { skip })
}
