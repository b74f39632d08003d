use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vhdlift_storage::{ByteRange, DiskStream, ImageBackend};

use crate::{PageStore, UploadError, UploadPlan};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
const RETRY_JITTER_MS: u64 = 200;

/// Default attempts per range before the whole run is failed.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Run-scoped configuration for one upload. Immutable after construction
/// and shared by reference across workers.
pub struct UploadContext<B> {
    pub stream: Arc<DiskStream<B>>,
    pub plan: UploadPlan,
    pub parallelism: usize,
    pub resume: bool,
    pub max_attempts: usize,
}

/// Shared progress counters; the only mutable state workers touch besides
/// the work-list cursor and the cancellation token.
#[derive(Debug, Default)]
pub struct UploadProgress {
    bytes_uploaded: AtomicU64,
    ranges_completed: AtomicU64,
}

impl UploadProgress {
    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Relaxed)
    }

    pub fn ranges_completed(&self) -> u64 {
        self.ranges_completed.load(Ordering::Relaxed)
    }

    fn record_range(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        self.ranges_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Execute the plan against the target blob.
///
/// Workers pull disjoint ranges from the shared plan through an atomic
/// cursor, so no two ever write the same pages. The first fatal error
/// cancels the token; in-flight operations settle before it propagates.
/// On success the byte accounting is confirmed against the plan.
pub async fn upload<B: ImageBackend + 'static>(
    ctx: UploadContext<B>,
    store: Arc<dyn PageStore>,
    progress: Arc<UploadProgress>,
) -> Result<(), UploadError> {
    let ranges: Arc<Vec<ByteRange>> = Arc::new(ctx.plan.ranges.clone());
    if ranges.is_empty() {
        tracing::info!("nothing to upload; destination is already complete");
        return Ok(());
    }

    let workers = ctx.parallelism.clamp(1, ranges.len());
    tracing::info!(
        workers,
        ranges = ranges.len(),
        bytes = ctx.plan.uploadable_bytes,
        resume = ctx.resume,
        "starting upload"
    );

    let cursor = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let first_error: Arc<Mutex<Option<UploadError>>> = Arc::new(Mutex::new(None));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let stream = ctx.stream.clone();
        let store = store.clone();
        let ranges = ranges.clone();
        let cursor = cursor.clone();
        let cancel = cancel.clone();
        let first_error = first_error.clone();
        let progress = progress.clone();
        let max_attempts = ctx.max_attempts;

        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(&range) = ranges.get(index) else {
                    break;
                };

                let result =
                    transfer_range(stream.as_ref(), store.as_ref(), range, max_attempts, &cancel)
                        .await;
                match result {
                    Ok(()) => progress.record_range(range.len()),
                    Err(err) => {
                        record_first_error(&first_error, err);
                        cancel.cancel();
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        if handle.await.is_err() {
            record_first_error(
                &first_error,
                UploadError::Io(std::io::Error::other("upload worker panicked")),
            );
            cancel.cancel();
        }
    }

    if let Some(err) = take_first_error(&first_error) {
        return Err(err);
    }

    let counted = progress.bytes_uploaded();
    if ctx.plan.already_processed_bytes + counted != ctx.plan.disk_size {
        return Err(UploadError::Accounting {
            expected: ctx.plan.uploadable_bytes,
            counted,
        });
    }

    Ok(())
}

async fn transfer_range<B: ImageBackend>(
    stream: &DiskStream<B>,
    store: &dyn PageStore,
    range: ByteRange,
    max_attempts: usize,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    let mut buf = vec![0u8; range.len() as usize];
    stream.read_at(range.start, &mut buf)?;

    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let err = match store.write_pages(range.start, &buf).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(UploadError::RangeFailed {
                start: range.start,
                end: range.end,
                attempts: attempt,
                source: err,
            });
        }

        tracing::warn!(
            start = range.start,
            end = range.end,
            attempt,
            error = %err,
            "page range write failed; retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            _ = tokio::time::sleep(jittered(delay)) => {}
        }
        delay = (delay * 2).min(RETRY_MAX_DELAY);
    }
}

fn jittered(base: Duration) -> Duration {
    base + Duration::from_millis(fastrand::u64(0..RETRY_JITTER_MS))
}

fn record_first_error(slot: &Mutex<Option<UploadError>>, err: UploadError) {
    if let Ok(mut guard) = slot.lock() {
        guard.get_or_insert(err);
    }
}

fn take_first_error(slot: &Mutex<Option<UploadError>>) -> Option<UploadError> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}
