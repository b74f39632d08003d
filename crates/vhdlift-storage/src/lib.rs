//! VHD image decoding and sparse stream access for vhdlift.
//!
//! The upload pipeline needs a *byte-addressed* view of a disk image, but
//! Dynamic and Differencing VHDs store data in blocks reachable only
//! through an allocation table, with per-sector presence bitmaps. This
//! crate provides:
//!
//! - [`VhdImage`]: decoded footer/header/BAT structures, one per chain layer
//! - [`DiskStream`]: contiguous read view over `[0, virtual size)` with
//!   implicit zero fill and parent-chain fallback
//! - [`RangeSet`]: disjoint sorted byte ranges (allocated spans, resume
//!   skip-lists, upload plans)
//!
//! Everything here is read-only; the upload workload never writes images.

mod backend;
mod error;
mod range_set;
mod stream;
mod vhd;

#[cfg(test)]
mod proptests;

pub use backend::{FileBackend, ImageBackend, MemBackend};
pub use error::{DiskError, Result};
pub use range_set::{ByteRange, RangeSet};
pub use stream::DiskStream;
pub use vhd::{DiskType, VhdImage, FOOTER_SIZE, MAX_PARENT_DEPTH, SECTOR_SIZE};
