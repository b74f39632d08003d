use std::path::Path;

use crate::backend::FileBackend;
use crate::vhd::{DiskType, VhdImage};
use crate::{DiskError, ImageBackend, RangeSet, Result};

/// Presents a VHD image (any type) as a logically contiguous, randomly
/// addressable byte stream of the declared virtual size.
///
/// The stream holds no mutable per-read state, so one instance can serve
/// many concurrent `read_at` calls (upload workers share it via `Arc`).
#[derive(Debug)]
pub struct DiskStream<B> {
    image: VhdImage<B>,
    size: u64,
}

impl<B: ImageBackend> DiskStream<B> {
    pub fn new(image: VhdImage<B>) -> Self {
        let size = image.virtual_size();
        Self { image, size }
    }

    /// Declared virtual size of the disk in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn disk_type(&self) -> DiskType {
        self.image.disk_type()
    }

    /// Read `buf.len()` bytes at `offset` as if the image were a single
    /// Fixed-format disk: unallocated spans read as zero, differencing
    /// images fall through to their parents sector by sector.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        if end > self.size {
            return Err(DiskError::OutOfBounds {
                offset,
                len: buf.len(),
                capacity: self.size,
            });
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.image.read_resolved(offset, buf)
    }

    /// Byte spans that could contain non-zero data: the whole disk for a
    /// Fixed image, one range per maximal run of allocated blocks for
    /// expandable images, unioned across the differencing parent chain.
    ///
    /// This over-approximates "has data"; a zero-content scan narrows it
    /// further before upload.
    pub fn allocated_ranges(&self) -> RangeSet {
        let mut set = RangeSet::new();
        self.image.allocated_ranges_into(&mut set);
        set
    }
}

impl DiskStream<FileBackend> {
    /// Open an image file, following the differencing parent chain.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let image = VhdImage::open_path(path)?;
        tracing::debug!(
            size = image.virtual_size(),
            disk_type = ?image.disk_type(),
            chain_depth = image.chain_depth(),
            "opened vhd image"
        );
        Ok(Self::new(image))
    }
}
