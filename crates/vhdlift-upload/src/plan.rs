use vhdlift_storage::{ByteRange, DiskStream, ImageBackend, RangeSet};

use crate::Result;

/// Smallest independently writable unit of the destination store.
pub const DEFAULT_PAGE_SIZE: u64 = 512;
/// Chunking granularity for a single transmission unit.
pub const DEFAULT_PAGE_SET_SIZE: u64 = 4 * 1024 * 1024;

/// Page granularities of the destination store. These are properties of
/// the store, not of the disk format, so they stay configurable.
#[derive(Debug, Clone, Copy)]
pub struct PlanConfig {
    pub page_size: u64,
    pub page_set_size: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_set_size: DEFAULT_PAGE_SET_SIZE,
        }
    }
}

/// The finalized work list for one upload run, plus its derived totals.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    pub ranges: Vec<ByteRange>,
    /// Bytes the destination already accounts for: skipped on resume or
    /// dropped as all-zero. `disk_size - uploadable_bytes`.
    pub already_processed_bytes: u64,
    pub uploadable_bytes: u64,
    pub disk_size: u64,
}

impl UploadPlan {
    pub fn new(disk_size: u64, ranges: Vec<ByteRange>) -> Self {
        let uploadable_bytes = ranges.iter().map(ByteRange::len).sum();
        Self {
            ranges,
            already_processed_bytes: disk_size - uploadable_bytes,
            uploadable_bytes,
            disk_size,
        }
    }
}

/// Turn the stream's allocated ranges into transmission units:
///
/// 1. subtract `skip` (already uploaded, from resume), splitting candidates
///    a skip range covers only partially;
/// 2. merge residuals separated by less than `page_set_size`, so runs of
///    small blocks become one request;
/// 3. cut at absolute `page_set_size` boundaries so no unit exceeds the
///    store's maximum write and interior cuts stay page-aligned;
/// 4. expand each unit outward to `page_size` multiples, clamped to the
///    disk size. Skip ranges come from the store page-aligned, so the
///    expansion never reaches into them.
pub fn locate_uploadable_ranges(
    allocated: &RangeSet,
    skip: &RangeSet,
    disk_size: u64,
    cfg: PlanConfig,
) -> Vec<ByteRange> {
    let mut residual = allocated.clone();
    residual.remove_set(skip);

    let merged = coalesce_gaps(residual.ranges(), skip, cfg.page_set_size);

    let mut out = Vec::new();
    for range in merged {
        let mut cursor = range.start;
        while cursor < range.end {
            let set_end = (cursor / cfg.page_set_size + 1) * cfg.page_set_size;
            let end = set_end.min(range.end);
            out.push(page_align(ByteRange::new(cursor, end), cfg.page_size, disk_size));
            cursor = end;
        }
    }
    out
}

/// Merge ranges whose separating gap is smaller than `max_gap`.
///
/// A gap that touches the skip set is never bridged: the merged unit would
/// re-cover bytes the destination already holds.
fn coalesce_gaps(ranges: &[ByteRange], skip: &RangeSet, max_gap: u64) -> Vec<ByteRange> {
    let mut out: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for &range in ranges {
        match out.last_mut() {
            Some(prev)
                if range.start - prev.end < max_gap
                    && !skip.intersects_range(prev.end, range.start) =>
            {
                prev.end = range.end;
            }
            _ => out.push(range),
        }
    }
    out
}

fn page_align(range: ByteRange, page_size: u64, disk_size: u64) -> ByteRange {
    let start = range.start - range.start % page_size;
    let end = range.end.div_ceil(page_size) * page_size;
    ByteRange::new(start, end.min(disk_size))
}

/// Drop every range whose full content is zero. Partially-zero ranges are
/// kept whole; splitting them for marginal savings is not attempted.
///
/// Returns the surviving ranges and the number of bytes dropped. This pass
/// reads every candidate byte and must finish before upload starts so the
/// totals used for progress reporting are final.
pub fn detect_empty_ranges<B: ImageBackend>(
    stream: &DiskStream<B>,
    ranges: Vec<ByteRange>,
) -> Result<(Vec<ByteRange>, u64)> {
    let mut kept = Vec::with_capacity(ranges.len());
    let mut dropped_bytes = 0u64;
    let mut buf: Vec<u8> = Vec::new();

    for range in ranges {
        let len = range.len() as usize;
        if buf.len() < len {
            buf.resize(len, 0);
        }
        stream.read_at(range.start, &mut buf[..len])?;
        if is_all_zero(&buf[..len]) {
            dropped_bytes += range.len();
        } else {
            kept.push(range);
        }
    }

    tracing::debug!(
        kept = kept.len(),
        dropped_bytes,
        "zero-content scan complete"
    );
    Ok((kept, dropped_bytes))
}

pub(crate) fn is_all_zero(buf: &[u8]) -> bool {
    // SAFETY: we only reinterpret the bytes as `u64`; every bit pattern is
    // a valid `u64`.
    let (prefix, words, suffix) = unsafe { buf.align_to::<u64>() };
    prefix.iter().all(|&b| b == 0)
        && words.iter().all(|&w| w == 0)
        && suffix.iter().all(|&b| b == 0)
}
