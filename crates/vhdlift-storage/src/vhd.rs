use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::backend::FileBackend;
use crate::{DiskError, ImageBackend, RangeSet, Result};

pub const SECTOR_SIZE: usize = 512;
pub const FOOTER_SIZE: usize = 512;

const FOOTER_COOKIE: [u8; 8] = *b"conectix";
const DYNAMIC_COOKIE: [u8; 8] = *b"cxsparse";
const DYNAMIC_HEADER_SIZE: usize = 1024;
const FILE_FORMAT_VERSION: u32 = 0x0001_0000;

/// BAT sentinel: the block was never written and reads as zero (or as the
/// parent's bytes for differencing images).
pub(crate) const BAT_UNALLOCATED: u32 = u32::MAX;

// Hard caps so a corrupt header cannot drive absurd allocations.
const MAX_BAT_BYTES: u64 = 128 * 1024 * 1024;
const MAX_BITMAP_BYTES: u64 = 32 * 1024 * 1024;
const MAX_LOCATOR_DATA_BYTES: u32 = 64 * 1024;

// Bound for in-memory sector bitmap caching per image layer.
const BITMAP_CACHE_BUDGET_BYTES: u64 = 16 * 1024 * 1024;

/// Parent chains are shallow in practice; anything deeper is treated as a
/// corrupt or adversarial image rather than walked indefinitely.
pub const MAX_PARENT_DEPTH: usize = 32;

const PLATFORM_CODE_W2KU: u32 = u32::from_be_bytes(*b"W2ku");
const PLATFORM_CODE_W2RU: u32 = u32::from_be_bytes(*b"W2ru");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differencing,
}

impl DiskType {
    fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            2 => Ok(Self::Fixed),
            3 => Ok(Self::Dynamic),
            4 => Ok(Self::Differencing),
            _ => Err(DiskError::Unsupported("vhd disk type")),
        }
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Ones'-complement sum over `raw` with the checksum field at
/// `checksum_field` treated as zero. Shared by the footer and the dynamic
/// header, which use the same algorithm at different offsets.
fn structure_checksum(raw: &[u8], checksum_field: std::ops::Range<usize>) -> u32 {
    let mut sum: u32 = 0;
    for (i, b) in raw.iter().enumerate() {
        if checksum_field.contains(&i) {
            continue;
        }
        sum = sum.wrapping_add(*b as u32);
    }
    !sum
}

#[derive(Debug, Clone)]
struct Footer {
    data_offset: u64,
    current_size: u64,
    disk_type: DiskType,
}

impl Footer {
    fn parse(raw: &[u8; FOOTER_SIZE]) -> Result<Self> {
        if raw[..8] != FOOTER_COOKIE {
            return Err(DiskError::CorruptImage("vhd footer cookie mismatch"));
        }
        if be_u32(&raw[12..16]) != FILE_FORMAT_VERSION {
            return Err(DiskError::Unsupported("vhd file format version"));
        }

        let expected = be_u32(&raw[64..68]);
        if expected != structure_checksum(raw, 64..68) {
            return Err(DiskError::CorruptImage("vhd footer checksum mismatch"));
        }

        let current_size = be_u64(&raw[48..56]);
        if current_size == 0 || current_size % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::CorruptImage("vhd current_size invalid"));
        }

        Ok(Self {
            data_offset: be_u64(&raw[16..24]),
            current_size,
            disk_type: DiskType::from_raw(be_u32(&raw[60..64]))?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct RawLocator {
    platform_code: u32,
    data_length: u32,
    data_offset: u64,
}

#[derive(Debug, Clone)]
struct DynamicHeader {
    table_offset: u64,
    max_table_entries: u32,
    block_size: u32,
    parent_unicode_name: Option<String>,
    locators: Vec<RawLocator>,
}

impl DynamicHeader {
    fn parse(raw: &[u8; DYNAMIC_HEADER_SIZE]) -> Result<Self> {
        if raw[..8] != DYNAMIC_COOKIE {
            return Err(DiskError::CorruptImage("vhd dynamic header cookie mismatch"));
        }

        let expected = be_u32(&raw[36..40]);
        if expected != structure_checksum(raw, 36..40) {
            return Err(DiskError::CorruptImage(
                "vhd dynamic header checksum mismatch",
            ));
        }

        let table_offset = be_u64(&raw[16..24]);
        let max_table_entries = be_u32(&raw[28..32]);
        let block_size = be_u32(&raw[32..36]);

        if table_offset % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::CorruptImage("vhd bat offset misaligned"));
        }
        if max_table_entries == 0 {
            return Err(DiskError::CorruptImage("vhd max_table_entries is zero"));
        }
        if block_size == 0 || block_size as u64 % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::CorruptImage("vhd block_size invalid"));
        }

        let parent_unicode_name = utf16be_string(&raw[64..576])?;

        let mut locators = Vec::new();
        for entry in raw[576..576 + 8 * 24].chunks_exact(24) {
            let platform_code = be_u32(&entry[0..4]);
            if platform_code == 0 {
                continue;
            }
            locators.push(RawLocator {
                platform_code,
                data_length: be_u32(&entry[8..12]),
                data_offset: be_u64(&entry[16..24]),
            });
        }

        Ok(Self {
            table_offset,
            max_table_entries,
            block_size,
            parent_unicode_name,
            locators,
        })
    }
}

fn utf16_units(bytes: &[u8], read: impl Fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(DiskError::CorruptImage("vhd parent name length odd"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| read([c[0], c[1]]))
        .collect();
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end])
        .map_err(|_| DiskError::CorruptImage("vhd parent name not valid UTF-16"))
}

/// Decode the header's parent unicode name (UTF-16BE); `None` when blank.
fn utf16be_string(bytes: &[u8]) -> Result<Option<String>> {
    let s = utf16_units(bytes, u16::from_be_bytes)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Decode parent locator platform data (UTF-16LE).
fn utf16le_string(bytes: &[u8]) -> Result<String> {
    utf16_units(bytes, u16::from_le_bytes)
}

/// Parent reference decoded from a differencing image's header: locator
/// paths in preference order plus the unicode-name fallback.
#[derive(Debug, Clone)]
pub(crate) struct ParentRef {
    absolute: Option<String>,
    relative: Option<String>,
    unicode_name: Option<String>,
}

#[derive(Debug)]
struct Expandable {
    block_size: u32,
    sectors_per_block: u64,
    bitmap_size: u64,
    bat: Vec<u32>,
    /// First byte usable for block data (end of footer copy / header / BAT).
    data_start: u64,
    /// One past the last byte usable for block data (trailing footer).
    data_limit: u64,
    bitmap_cache: Mutex<LruCache<u32, Arc<Vec<u8>>>>,
}

/// A decoded VHD image layer, possibly chained to a parent for
/// differencing disks. Read-only; all access takes `&self`.
#[derive(Debug)]
pub struct VhdImage<B> {
    backend: B,
    footer: Footer,
    expandable: Option<Expandable>,
    parent: Option<Box<VhdImage<B>>>,
}

impl<B: ImageBackend> VhdImage<B> {
    /// Open a Fixed or Dynamic image from a backend.
    ///
    /// Differencing images need a filesystem path to resolve their parent
    /// chain; use [`VhdImage::open_path`] for those.
    pub fn open(backend: B) -> Result<Self> {
        let (image, parent) = Self::open_layer(backend)?;
        if parent.is_some() {
            return Err(DiskError::Unsupported(
                "differencing image requires a parent path; open it by path",
            ));
        }
        Ok(image)
    }

    fn open_layer(backend: B) -> Result<(Self, Option<ParentRef>)> {
        let len = backend.len();
        if len < FOOTER_SIZE as u64 || len % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::CorruptImage("vhd file length invalid"));
        }

        let footer_offset = len - FOOTER_SIZE as u64;
        let mut raw_footer = [0u8; FOOTER_SIZE];
        backend.read_at(footer_offset, &mut raw_footer)?;
        let footer = Footer::parse(&raw_footer)?;

        match footer.disk_type {
            DiskType::Fixed => {
                let required = footer
                    .current_size
                    .checked_add(FOOTER_SIZE as u64)
                    .ok_or(DiskError::CorruptImage("vhd current_size overflow"))?;
                if len < required {
                    return Err(DiskError::CorruptImage("vhd fixed disk truncated"));
                }
                Ok((
                    Self {
                        backend,
                        footer,
                        expandable: None,
                        parent: None,
                    },
                    None,
                ))
            }
            DiskType::Dynamic | DiskType::Differencing => {
                let (expandable, header) =
                    Self::open_expandable(&backend, &footer, footer_offset)?;

                let parent = if footer.disk_type == DiskType::Differencing {
                    Some(Self::decode_parent_ref(&backend, &header, len)?)
                } else {
                    None
                };

                Ok((
                    Self {
                        backend,
                        footer,
                        expandable: Some(expandable),
                        parent: None,
                    },
                    parent,
                ))
            }
        }
    }

    fn open_expandable(
        backend: &B,
        footer: &Footer,
        footer_offset: u64,
    ) -> Result<(Expandable, DynamicHeader)> {
        if footer.data_offset == u64::MAX || footer.data_offset % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::CorruptImage("vhd dynamic header offset invalid"));
        }
        if footer.data_offset < FOOTER_SIZE as u64 {
            return Err(DiskError::CorruptImage(
                "vhd dynamic header overlaps footer copy",
            ));
        }
        let header_end = footer
            .data_offset
            .checked_add(DYNAMIC_HEADER_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        if header_end > footer_offset {
            return Err(DiskError::CorruptImage("vhd dynamic header truncated"));
        }

        let mut raw_header = [0u8; DYNAMIC_HEADER_SIZE];
        backend.read_at(footer.data_offset, &mut raw_header)?;
        let header = DynamicHeader::parse(&raw_header)?;

        let block_size = header.block_size as u64;
        let required_entries = footer.current_size.div_ceil(block_size);
        if (header.max_table_entries as u64) < required_entries {
            return Err(DiskError::CorruptImage("vhd bat too small"));
        }

        // The on-disk BAT region is sized by max_table_entries; only the
        // entries covering the virtual size are read.
        let bat_region = (header.max_table_entries as u64)
            .checked_mul(4)
            .ok_or(DiskError::OffsetOverflow)?
            .div_ceil(SECTOR_SIZE as u64)
            * SECTOR_SIZE as u64;
        if bat_region > MAX_BAT_BYTES {
            return Err(DiskError::Unsupported("vhd bat too large"));
        }
        let bat_end = header
            .table_offset
            .checked_add(bat_region)
            .ok_or(DiskError::OffsetOverflow)?;
        if header.table_offset < FOOTER_SIZE as u64 || bat_end > footer_offset {
            return Err(DiskError::CorruptImage("vhd bat out of bounds"));
        }

        let bat_bytes = required_entries
            .checked_mul(4)
            .ok_or(DiskError::OffsetOverflow)?;
        let entries: usize = required_entries
            .try_into()
            .map_err(|_| DiskError::Unsupported("vhd bat too large"))?;
        let mut bat_buf = vec![0u8; bat_bytes as usize];
        backend.read_at(header.table_offset, &mut bat_buf)?;
        let mut bat = Vec::with_capacity(entries);
        for chunk in bat_buf.chunks_exact(4) {
            bat.push(be_u32(chunk));
        }

        let sectors_per_block = block_size / SECTOR_SIZE as u64;
        let bitmap_size = sectors_per_block.div_ceil(8).div_ceil(SECTOR_SIZE as u64)
            * SECTOR_SIZE as u64;
        if bitmap_size > MAX_BITMAP_BYTES {
            return Err(DiskError::Unsupported("vhd bitmap too large"));
        }

        let data_start = (FOOTER_SIZE as u64).max(header_end).max(bat_end);

        let cache_entries = (BITMAP_CACHE_BUDGET_BYTES / bitmap_size).clamp(1, 4096) as usize;
        let cache_cap = NonZeroUsize::new(cache_entries)
            .ok_or(DiskError::CorruptImage("vhd bitmap cache capacity"))?;

        Ok((
            Expandable {
                block_size: header.block_size,
                sectors_per_block,
                bitmap_size,
                bat,
                data_start,
                data_limit: footer_offset,
                bitmap_cache: Mutex::new(LruCache::new(cache_cap)),
            },
            header,
        ))
    }

    fn decode_parent_ref(backend: &B, header: &DynamicHeader, len: u64) -> Result<ParentRef> {
        let mut absolute = None;
        let mut relative = None;

        for loc in &header.locators {
            if loc.platform_code != PLATFORM_CODE_W2KU && loc.platform_code != PLATFORM_CODE_W2RU {
                continue;
            }
            if loc.data_length == 0 || loc.data_length > MAX_LOCATOR_DATA_BYTES {
                continue;
            }
            let end = loc
                .data_offset
                .checked_add(loc.data_length as u64)
                .ok_or(DiskError::OffsetOverflow)?;
            if end > len {
                return Err(DiskError::CorruptImage("vhd parent locator out of bounds"));
            }
            let mut data = vec![0u8; loc.data_length as usize];
            backend.read_at(loc.data_offset, &mut data)?;
            let path = utf16le_string(&data)?;
            if path.is_empty() {
                continue;
            }
            if loc.platform_code == PLATFORM_CODE_W2KU {
                absolute = Some(path);
            } else {
                relative = Some(path);
            }
        }

        Ok(ParentRef {
            absolute,
            relative,
            unicode_name: header.parent_unicode_name.clone(),
        })
    }

    pub fn virtual_size(&self) -> u64 {
        self.footer.current_size
    }

    pub fn disk_type(&self) -> DiskType {
        self.footer.disk_type
    }

    pub fn block_size(&self) -> Option<u32> {
        self.expandable.as_ref().map(|e| e.block_size)
    }

    /// Depth of the parent chain, 1 for a standalone image.
    pub fn chain_depth(&self) -> usize {
        let mut depth = 1;
        let mut cur = self;
        while let Some(p) = &cur.parent {
            depth += 1;
            cur = p;
        }
        depth
    }

    fn bitmap_get(bitmap: &[u8], sector_in_block: u64) -> Result<bool> {
        let byte = (sector_in_block / 8) as usize;
        if byte >= bitmap.len() {
            return Err(DiskError::CorruptImage("vhd bitmap too small"));
        }
        let bit = 7 - (sector_in_block % 8) as u8;
        Ok(bitmap[byte] & (1u8 << bit) != 0)
    }

    /// Length of the run starting at `within_block` whose sectors all share
    /// the presence state of the first one, capped at `remaining` bytes.
    fn presence_run(
        bitmap: &[u8],
        sectors_per_block: u64,
        within_block: u64,
        remaining: u64,
        present: bool,
    ) -> Result<u64> {
        let limit = within_block
            .checked_add(remaining)
            .ok_or(DiskError::OffsetOverflow)?;
        let mut sector = within_block / SECTOR_SIZE as u64;
        let mut end = ((sector + 1) * SECTOR_SIZE as u64).min(limit);
        loop {
            sector += 1;
            if end >= limit || sector >= sectors_per_block {
                break;
            }
            if Self::bitmap_get(bitmap, sector)? != present {
                break;
            }
            end = ((sector + 1) * SECTOR_SIZE as u64).min(limit);
        }
        Ok(end - within_block)
    }

    fn load_bitmap(&self, exp: &Expandable, bat_entry: u32, block_start: u64) -> Result<Arc<Vec<u8>>> {
        {
            let mut cache = self.bitmap_cache_lock(exp)?;
            if let Some(hit) = cache.get(&bat_entry) {
                return Ok(hit.clone());
            }
        }

        let mut bitmap = vec![0u8; exp.bitmap_size as usize];
        self.backend
            .read_at(block_start, &mut bitmap)
            .map_err(corrupt_on_oob("vhd block bitmap truncated"))?;
        let arc = Arc::new(bitmap);
        self.bitmap_cache_lock(exp)?.push(bat_entry, arc.clone());
        Ok(arc)
    }

    fn bitmap_cache_lock<'a>(
        &self,
        exp: &'a Expandable,
    ) -> Result<std::sync::MutexGuard<'a, LruCache<u32, Arc<Vec<u8>>>>> {
        exp.bitmap_cache
            .lock()
            .map_err(|_| DiskError::CorruptImage("vhd bitmap cache poisoned"))
    }

    fn block_start(&self, exp: &Expandable, bat_entry: u32) -> Result<u64> {
        let block_start = (bat_entry as u64)
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        let block_end = block_start
            .checked_add(exp.bitmap_size)
            .and_then(|v| v.checked_add(exp.block_size as u64))
            .ok_or(DiskError::OffsetOverflow)?;
        // A corrupt BAT entry must not point into the metadata region or past
        // the trailing footer.
        if block_start < exp.data_start || block_end > exp.data_limit {
            return Err(DiskError::CorruptImage("vhd block out of bounds"));
        }
        Ok(block_start)
    }

    /// Read `buf.len()` bytes at `offset` of the virtual address space,
    /// resolving unallocated spans through the parent chain (zero at the
    /// bottom). Bounds are the caller's responsibility.
    pub(crate) fn read_resolved(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let Some(exp) = &self.expandable else {
            return self
                .backend
                .read_at(offset, buf)
                .map_err(corrupt_on_oob("vhd fixed disk truncated"));
        };

        let block_size = exp.block_size as u64;
        let mut pos = 0usize;
        while pos < buf.len() {
            let abs = offset
                .checked_add(pos as u64)
                .ok_or(DiskError::OffsetOverflow)?;
            let block_index = (abs / block_size) as usize;
            let within_block = abs % block_size;
            let chunk_len = ((block_size - within_block) as usize).min(buf.len() - pos);

            let Some(&bat_entry) = exp.bat.get(block_index) else {
                return Err(DiskError::CorruptImage("vhd block index out of range"));
            };

            if bat_entry == BAT_UNALLOCATED {
                self.read_parent(abs, &mut buf[pos..pos + chunk_len])?;
                pos += chunk_len;
                continue;
            }

            let block_start = self.block_start(exp, bat_entry)?;
            let bitmap = self.load_bitmap(exp, bat_entry, block_start)?;

            let mut within = within_block;
            let mut remaining = chunk_len;
            while remaining > 0 {
                let sector = within / SECTOR_SIZE as u64;
                if sector >= exp.sectors_per_block {
                    return Err(DiskError::CorruptImage("vhd sector index out of range"));
                }
                let present = Self::bitmap_get(&bitmap, sector)?;
                let run = Self::presence_run(
                    &bitmap,
                    exp.sectors_per_block,
                    within,
                    remaining as u64,
                    present,
                )? as usize;

                let dst = &mut buf[pos..pos + run];
                if present {
                    let phys = block_start
                        .checked_add(exp.bitmap_size)
                        .and_then(|v| v.checked_add(within))
                        .ok_or(DiskError::OffsetOverflow)?;
                    self.backend
                        .read_at(phys, dst)
                        .map_err(corrupt_on_oob("vhd block data truncated"))?;
                } else {
                    let run_abs = abs
                        .checked_add(within - within_block)
                        .ok_or(DiskError::OffsetOverflow)?;
                    self.read_parent(run_abs, dst)?;
                }

                within += run as u64;
                pos += run;
                remaining -= run;
            }
        }

        Ok(())
    }

    fn read_parent(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match &self.parent {
            Some(parent) => parent.read_resolved(offset, buf),
            None => {
                buf.fill(0);
                Ok(())
            }
        }
    }

    /// Insert one range per maximal run of allocated blocks, recursing
    /// through the parent chain: a span is a candidate if any layer has it
    /// allocated.
    pub(crate) fn allocated_ranges_into(&self, set: &mut RangeSet) {
        let size = self.virtual_size();
        match &self.expandable {
            None => set.insert(0, size),
            Some(exp) => {
                let block_size = exp.block_size as u64;
                let mut run_start: Option<u64> = None;
                for (index, &entry) in exp.bat.iter().enumerate() {
                    let block_off = index as u64 * block_size;
                    if entry != BAT_UNALLOCATED {
                        run_start.get_or_insert(block_off);
                    } else if let Some(start) = run_start.take() {
                        set.insert(start, block_off.min(size));
                    }
                }
                if let Some(start) = run_start {
                    set.insert(start, size);
                }
            }
        }
        if let Some(parent) = &self.parent {
            parent.allocated_ranges_into(set);
        }
    }
}

fn corrupt_on_oob(ctx: &'static str) -> impl Fn(DiskError) -> DiskError {
    move |err| match err {
        DiskError::OutOfBounds { .. } => DiskError::CorruptImage(ctx),
        other => other,
    }
}

impl VhdImage<FileBackend> {
    /// Open an image from a path, following the differencing parent chain.
    ///
    /// The chain is walked iteratively with a depth guard; each layer's
    /// virtual size must match its child's.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut layers: Vec<VhdImage<FileBackend>> = Vec::new();
        let mut next: Option<PathBuf> = Some(path.as_ref().to_path_buf());

        while let Some(layer_path) = next.take() {
            if layers.len() >= MAX_PARENT_DEPTH {
                return Err(DiskError::ParentChainTooDeep {
                    max: MAX_PARENT_DEPTH,
                });
            }
            let backend = FileBackend::open_read_only(&layer_path)?;
            let (image, parent_ref) = Self::open_layer(backend)?;
            if let Some(parent_ref) = parent_ref {
                next = Some(resolve_parent_path(&layer_path, &parent_ref)?);
            }
            layers.push(image);
        }

        // Attach parents base-first so each child ends up owning its chain.
        let mut chain: Option<Box<VhdImage<FileBackend>>> = None;
        for mut layer in layers.into_iter().rev() {
            if let Some(parent) = chain.take() {
                if parent.virtual_size() != layer.virtual_size() {
                    return Err(DiskError::CorruptImage(
                        "vhd differencing parent size mismatch",
                    ));
                }
                layer.parent = Some(parent);
            }
            chain = Some(Box::new(layer));
        }

        match chain {
            Some(image) => Ok(*image),
            // The loop above runs at least once for any readable path.
            None => Err(DiskError::CorruptImage("vhd image chain empty")),
        }
    }
}

/// Pick the first parent path candidate that exists: absolute locator,
/// relative locator (resolved against the child's directory), then the
/// header's unicode name as a sibling file.
fn resolve_parent_path(child: &Path, parent_ref: &ParentRef) -> Result<PathBuf> {
    let child_dir = child.parent().unwrap_or_else(|| Path::new(""));

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(abs) = &parent_ref.absolute {
        candidates.push(PathBuf::from(normalize_separators(abs)));
    }
    if let Some(rel) = &parent_ref.relative {
        candidates.push(child_dir.join(normalize_separators(rel)));
    }
    if let Some(name) = &parent_ref.unicode_name {
        let name = normalize_separators(name);
        let file_name = Path::new(&name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&name));
        candidates.push(child_dir.join(file_name));
    }

    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }

    Err(DiskError::ParentNotFound(
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    ))
}

/// Locator paths are recorded with Windows separators regardless of the
/// platform that wrote them.
fn normalize_separators(raw: &str) -> String {
    if std::path::MAIN_SEPARATOR == '\\' {
        raw.to_string()
    } else {
        raw.replace('\\', "/")
    }
}
