use vhdlift_storage::{
    ByteRange, DiskError, DiskStream, DiskType, MemBackend, VhdImage, SECTOR_SIZE,
};

const SECTOR: usize = SECTOR_SIZE;
const VHD_TYPE_FIXED: u32 = 2;
const VHD_TYPE_DYNAMIC: u32 = 3;
const VHD_TYPE_DIFFERENCING: u32 = 4;

fn write_be_u32(buf: &mut [u8], offset: usize, val: u32) {
    buf[offset..offset + 4].copy_from_slice(&val.to_be_bytes());
}

fn write_be_u64(buf: &mut [u8], offset: usize, val: u64) {
    buf[offset..offset + 8].copy_from_slice(&val.to_be_bytes());
}

fn checksum_with_field_zeroed(raw: &[u8], field: std::ops::Range<usize>) -> u32 {
    let mut sum: u32 = 0;
    for (i, b) in raw.iter().enumerate() {
        if field.contains(&i) {
            continue;
        }
        sum = sum.wrapping_add(*b as u32);
    }
    !sum
}

fn make_footer(virtual_size: u64, disk_type: u32, data_offset: u64) -> [u8; SECTOR] {
    let mut footer = [0u8; SECTOR];
    footer[0..8].copy_from_slice(b"conectix");
    write_be_u32(&mut footer, 8, 2); // features
    write_be_u32(&mut footer, 12, 0x0001_0000); // file format version
    write_be_u64(&mut footer, 16, data_offset);
    write_be_u64(&mut footer, 40, virtual_size); // original size
    write_be_u64(&mut footer, 48, virtual_size); // current size
    write_be_u32(&mut footer, 60, disk_type);
    let checksum = checksum_with_field_zeroed(&footer, 64..68);
    write_be_u32(&mut footer, 64, checksum);
    footer
}

fn make_fixed_image(data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % SECTOR, 0);
    let mut image = data.to_vec();
    image.extend_from_slice(&make_footer(data.len() as u64, VHD_TYPE_FIXED, u64::MAX));
    image
}

fn utf16le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn utf16be_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// Builds a Dynamic or Differencing image the way a real writer lays one
/// out: footer copy, dynamic header, BAT, optional parent locator sector,
/// blocks (bitmap + data), trailing footer.
struct ExpandableBuilder {
    virtual_size: u64,
    block_size: u32,
    disk_type: u32,
    writes: Vec<(u64, Vec<u8>)>,
    parent_relative: Option<String>,
    parent_unicode_name: Option<String>,
}

impl ExpandableBuilder {
    fn dynamic(virtual_size: u64, block_size: u32) -> Self {
        Self {
            virtual_size,
            block_size,
            disk_type: VHD_TYPE_DYNAMIC,
            writes: Vec::new(),
            parent_relative: None,
            parent_unicode_name: None,
        }
    }

    fn differencing(virtual_size: u64, block_size: u32) -> Self {
        Self {
            disk_type: VHD_TYPE_DIFFERENCING,
            ..Self::dynamic(virtual_size, block_size)
        }
    }

    fn write(mut self, offset: u64, data: &[u8]) -> Self {
        self.writes.push((offset, data.to_vec()));
        self
    }

    fn parent_relative(mut self, path: &str) -> Self {
        self.parent_relative = Some(path.to_string());
        self
    }

    fn parent_unicode_name(mut self, name: &str) -> Self {
        self.parent_unicode_name = Some(name.to_string());
        self
    }

    fn build(self) -> Vec<u8> {
        let block_size = self.block_size as u64;
        let entries = self.virtual_size.div_ceil(block_size) as usize;
        let sectors_per_block = block_size / SECTOR as u64;
        let bitmap_size = sectors_per_block.div_ceil(8).div_ceil(SECTOR as u64) * SECTOR as u64;

        let header_offset = SECTOR as u64;
        let bat_offset = header_offset + 1024;
        let bat_region = ((entries * 4) as u64).div_ceil(SECTOR as u64) * SECTOR as u64;
        let locator_offset = bat_offset + bat_region;
        let locator_data = self.parent_relative.as_deref().map(utf16le_bytes);
        let data_origin = locator_offset + if locator_data.is_some() { SECTOR as u64 } else { 0 };

        // Materialize blocks touched by writes: per-block data buffer plus
        // presence bits for every sector a write lands in.
        let mut blocks: std::collections::BTreeMap<usize, (Vec<u8>, Vec<u8>)> =
            std::collections::BTreeMap::new();
        for (offset, data) in &self.writes {
            let mut pos = 0usize;
            while pos < data.len() {
                let abs = offset + pos as u64;
                let block_index = (abs / block_size) as usize;
                let within = (abs % block_size) as usize;
                let chunk = (block_size as usize - within).min(data.len() - pos);
                let (bitmap, block_data) = blocks.entry(block_index).or_insert_with(|| {
                    (vec![0u8; bitmap_size as usize], vec![0u8; block_size as usize])
                });
                block_data[within..within + chunk].copy_from_slice(&data[pos..pos + chunk]);
                let first_sector = within / SECTOR;
                let last_sector = (within + chunk - 1) / SECTOR;
                for sector in first_sector..=last_sector {
                    bitmap[sector / 8] |= 1 << (7 - (sector % 8) as u8);
                }
                pos += chunk;
            }
        }

        let mut bat = vec![0xFFu8; entries * 4];
        let mut data_region = Vec::new();
        for (block_index, (bitmap, block_data)) in &blocks {
            let phys = data_origin + data_region.len() as u64;
            write_be_u32(&mut bat, block_index * 4, (phys / SECTOR as u64) as u32);
            data_region.extend_from_slice(bitmap);
            data_region.extend_from_slice(block_data);
        }

        let mut header = [0u8; 1024];
        header[0..8].copy_from_slice(b"cxsparse");
        write_be_u64(&mut header, 8, u64::MAX);
        write_be_u64(&mut header, 16, bat_offset);
        write_be_u32(&mut header, 24, 0x0001_0000); // header version
        write_be_u32(&mut header, 28, entries as u32);
        write_be_u32(&mut header, 32, self.block_size);
        if let Some(name) = &self.parent_unicode_name {
            let encoded = utf16be_bytes(name);
            header[64..64 + encoded.len()].copy_from_slice(&encoded);
        }
        if let Some(data) = &locator_data {
            // Locator entry 0: platform code W2ru, data in its own sector.
            header[576..580].copy_from_slice(b"W2ru");
            write_be_u32(&mut header, 580, SECTOR as u32); // data space
            write_be_u32(&mut header, 584, data.len() as u32);
            write_be_u64(&mut header, 592, locator_offset);
        }
        let checksum = checksum_with_field_zeroed(&header, 36..40);
        write_be_u32(&mut header, 36, checksum);

        let footer = make_footer(self.virtual_size, self.disk_type, header_offset);

        let mut image = Vec::new();
        image.extend_from_slice(&footer); // footer copy at offset 0
        image.extend_from_slice(&header);
        let mut padded_bat = bat;
        padded_bat.resize(bat_region as usize, 0);
        image.extend_from_slice(&padded_bat);
        if let Some(data) = &locator_data {
            let mut sector = vec![0u8; SECTOR];
            sector[..data.len()].copy_from_slice(data);
            image.extend_from_slice(&sector);
        }
        image.extend_from_slice(&data_region);
        image.extend_from_slice(&footer);
        image
    }
}

fn open_stream(image: Vec<u8>) -> DiskStream<MemBackend> {
    DiskStream::new(VhdImage::open(MemBackend::new(image)).expect("open image"))
}

fn read_vec(stream: &DiskStream<MemBackend>, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_at(offset, &mut buf).expect("read");
    buf
}

#[test]
fn fixed_full_span_read_matches_raw_bytes() {
    let mut data = vec![0u8; 4 * SECTOR];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let stream = open_stream(make_fixed_image(&data));

    assert_eq!(stream.disk_type(), DiskType::Fixed);
    assert_eq!(stream.size(), data.len() as u64);
    assert_eq!(read_vec(&stream, 0, data.len()), data);
}

#[test]
fn fixed_allocated_ranges_cover_whole_disk() {
    let stream = open_stream(make_fixed_image(&vec![7u8; 2 * SECTOR]));
    let ranges = stream.allocated_ranges();
    assert_eq!(ranges.ranges(), &[ByteRange::new(0, 2 * SECTOR as u64)]);
}

#[test]
fn fixed_truncated_file_is_rejected() {
    let data = vec![1u8; 4 * SECTOR];
    let mut image = make_fixed_image(&data);
    // Drop one sector of data, keeping the footer parseable.
    let footer = image.split_off(image.len() - SECTOR);
    image.truncate(image.len() - SECTOR);
    image.extend_from_slice(&footer);

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(err, DiskError::CorruptImage(_)));
}

#[test]
fn footer_cookie_mismatch_is_rejected() {
    let mut image = make_fixed_image(&vec![0u8; SECTOR]);
    let footer_at = image.len() - SECTOR;
    image[footer_at] = b'x';

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(
        err,
        DiskError::CorruptImage("vhd footer cookie mismatch")
    ));
}

#[test]
fn footer_checksum_mismatch_is_rejected() {
    let mut image = make_fixed_image(&vec![0u8; SECTOR]);
    let footer_at = image.len() - SECTOR;
    // Flip a byte outside the checksum field.
    image[footer_at + 24] ^= 0xFF;

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(
        err,
        DiskError::CorruptImage("vhd footer checksum mismatch")
    ));
}

#[test]
fn unsupported_format_version_is_rejected() {
    let data = vec![0u8; SECTOR];
    let mut footer = make_footer(SECTOR as u64, VHD_TYPE_FIXED, u64::MAX);
    write_be_u32(&mut footer, 12, 0x0002_0000);
    let checksum = checksum_with_field_zeroed(&footer, 64..68);
    write_be_u32(&mut footer, 64, checksum);
    let mut image = data;
    image.extend_from_slice(&footer);

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(
        err,
        DiskError::Unsupported("vhd file format version")
    ));
}

#[test]
fn unknown_disk_type_is_rejected() {
    let data = vec![0u8; SECTOR];
    let footer = make_footer(SECTOR as u64, 7, u64::MAX);
    let mut image = data;
    image.extend_from_slice(&footer);

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(err, DiskError::Unsupported("vhd disk type")));
}

#[test]
fn dynamic_unallocated_region_reads_zero() {
    let stream = open_stream(ExpandableBuilder::dynamic(16 * 1024, 4096).build());

    assert_eq!(stream.disk_type(), DiskType::Dynamic);
    assert_eq!(read_vec(&stream, 0, 16 * 1024), vec![0u8; 16 * 1024]);
    assert!(stream.allocated_ranges().is_empty());
}

#[test]
fn dynamic_written_sectors_read_back() {
    let payload = vec![0xABu8; SECTOR];
    let image = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(0, b"hello vhd")
        .write(2 * 4096 + SECTOR as u64, &payload)
        .build();
    let stream = open_stream(image);

    assert_eq!(&read_vec(&stream, 0, 9), b"hello vhd");
    // Rest of the written sector is zero.
    assert_eq!(read_vec(&stream, 9, SECTOR - 9), vec![0u8; SECTOR - 9]);
    // Allocated block, sector bit unset: zero without touching storage.
    assert_eq!(read_vec(&stream, 2 * 4096, SECTOR), vec![0u8; SECTOR]);
    assert_eq!(read_vec(&stream, 2 * 4096 + SECTOR as u64, SECTOR), payload);
}

#[test]
fn dynamic_read_spans_allocated_and_unallocated_blocks() {
    let image = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(0, &vec![1u8; 4096])
        .write(2 * 4096, &vec![2u8; 4096])
        .build();
    let stream = open_stream(image);

    let got = read_vec(&stream, 0, 3 * 4096);
    assert_eq!(&got[..4096], &vec![1u8; 4096][..]);
    assert_eq!(&got[4096..2 * 4096], &vec![0u8; 4096][..]);
    assert_eq!(&got[2 * 4096..], &vec![2u8; 4096][..]);
}

#[test]
fn dynamic_allocated_ranges_are_block_runs() {
    let image = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(0, b"a")
        .write(4096, b"b")
        .write(3 * 4096, b"c")
        .build();
    let stream = open_stream(image);

    assert_eq!(
        stream.allocated_ranges().ranges(),
        &[ByteRange::new(0, 8192), ByteRange::new(12288, 16384)]
    );
}

#[test]
fn reads_past_virtual_size_are_rejected() {
    let stream = open_stream(make_fixed_image(&vec![0u8; 2 * SECTOR]));

    let mut buf = [0u8; 2];
    let err = stream.read_at(2 * SECTOR as u64 - 1, &mut buf).unwrap_err();
    assert!(matches!(err, DiskError::OutOfBounds { .. }));

    // Empty read at the exact end is fine.
    stream.read_at(2 * SECTOR as u64, &mut []).expect("empty read");
}

#[test]
fn bat_smaller_than_virtual_size_is_rejected() {
    let mut image = ExpandableBuilder::dynamic(16 * 1024, 4096).build();
    // Rewrite max_table_entries (header offset 512 + 28) to 1 of the 4 needed.
    write_be_u32(&mut image[SECTOR..], 28, 1);
    let checksum = checksum_with_field_zeroed(&image[SECTOR..SECTOR + 1024], 36..40);
    write_be_u32(&mut image[SECTOR..], 36, checksum);

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(err, DiskError::CorruptImage("vhd bat too small")));
}

#[test]
fn dynamic_header_checksum_mismatch_is_rejected() {
    let mut image = ExpandableBuilder::dynamic(16 * 1024, 4096).build();
    image[SECTOR + 16] ^= 0xFF; // corrupt table_offset without fixing checksum

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(
        err,
        DiskError::CorruptImage("vhd dynamic header checksum mismatch")
    ));
}

#[test]
fn differencing_requires_path_based_open() {
    let image = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_relative("parent.vhd")
        .build();

    let err = VhdImage::open(MemBackend::new(image)).unwrap_err();
    assert!(matches!(err, DiskError::Unsupported(_)));
}

#[test]
fn differencing_reads_fall_through_to_parent() {
    let dir = tempfile::tempdir().expect("tempdir");

    let parent = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(0, &vec![0xAAu8; 2 * SECTOR])
        .write(3 * 4096, &vec![0xBBu8; SECTOR])
        .build();
    std::fs::write(dir.path().join("parent.vhd"), parent).expect("write parent");

    let child = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_relative(".\\parent.vhd")
        .write(SECTOR as u64, &vec![0xCCu8; SECTOR]) // override parent sector 1
        .write(4096, &vec![0xDDu8; SECTOR]) // block parent never touched
        .build();
    let child_path = dir.path().join("child.vhd");
    std::fs::write(&child_path, child).expect("write child");

    let stream = DiskStream::open_path(&child_path).expect("open chain");
    assert_eq!(stream.disk_type(), DiskType::Differencing);

    // Child block 0 is allocated but sector 0's bit is unset: parent wins.
    let mut buf = vec![0u8; SECTOR];
    stream.read_at(0, &mut buf).expect("read");
    assert_eq!(buf, vec![0xAAu8; SECTOR]);

    // Child overrides sector 1.
    stream.read_at(SECTOR as u64, &mut buf).expect("read");
    assert_eq!(buf, vec![0xCCu8; SECTOR]);

    // Child-only block.
    stream.read_at(4096, &mut buf).expect("read");
    assert_eq!(buf, vec![0xDDu8; SECTOR]);

    // Block allocated only in the parent.
    stream.read_at(3 * 4096, &mut buf).expect("read");
    assert_eq!(buf, vec![0xBBu8; SECTOR]);

    // Nothing anywhere: zero.
    stream.read_at(2 * 4096, &mut buf).expect("read");
    assert_eq!(buf, vec![0u8; SECTOR]);
}

#[test]
fn differencing_allocated_ranges_union_parent_chain() {
    let dir = tempfile::tempdir().expect("tempdir");

    let parent = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(3 * 4096, b"parent tail")
        .build();
    std::fs::write(dir.path().join("parent.vhd"), parent).expect("write parent");

    let child = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_relative("parent.vhd")
        .write(0, b"child head")
        .build();
    let child_path = dir.path().join("child.vhd");
    std::fs::write(&child_path, child).expect("write child");

    let stream = DiskStream::open_path(&child_path).expect("open chain");
    assert_eq!(
        stream.allocated_ranges().ranges(),
        &[ByteRange::new(0, 4096), ByteRange::new(12288, 16384)]
    );
}

#[test]
fn differencing_parent_resolves_via_unicode_name_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");

    let parent = ExpandableBuilder::dynamic(16 * 1024, 4096)
        .write(0, b"base")
        .build();
    std::fs::write(dir.path().join("base.vhd"), parent).expect("write parent");

    let child = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_unicode_name("base.vhd")
        .build();
    let child_path = dir.path().join("child.vhd");
    std::fs::write(&child_path, child).expect("write child");

    let stream = DiskStream::open_path(&child_path).expect("open chain");
    let mut buf = [0u8; 4];
    stream.read_at(0, &mut buf).expect("read");
    assert_eq!(&buf, b"base");
}

#[test]
fn differencing_missing_parent_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");

    let child = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_relative("nowhere.vhd")
        .build();
    let child_path = dir.path().join("child.vhd");
    std::fs::write(&child_path, child).expect("write child");

    let err = DiskStream::open_path(&child_path).unwrap_err();
    assert!(matches!(err, DiskError::ParentNotFound(_)));
}

#[test]
fn differencing_parent_size_mismatch_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");

    let parent = ExpandableBuilder::dynamic(32 * 1024, 4096).build();
    std::fs::write(dir.path().join("parent.vhd"), parent).expect("write parent");

    let child = ExpandableBuilder::differencing(16 * 1024, 4096)
        .parent_relative("parent.vhd")
        .build();
    let child_path = dir.path().join("child.vhd");
    std::fs::write(&child_path, child).expect("write child");

    let err = DiskStream::open_path(&child_path).unwrap_err();
    assert!(matches!(
        err,
        DiskError::CorruptImage("vhd differencing parent size mismatch")
    ));
}
