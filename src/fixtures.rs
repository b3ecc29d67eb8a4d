//! Builders for synthetic on-disk structures used by the unit tests.

pub const UPDATE_SEQUENCE: [u8; 2] = [0x01, 0x00];
pub const RECORD_SIZE: usize = 1024;
pub const CLUSTER_SIZE: usize = 4096;

/// 2021-06-01T12:00:00Z as a FILETIME.
const SAMPLE_FILETIME: u64 = 132_670_224_000_000_000;

/// Seven runs, the last six exercising positive and negative deltas.
pub const FRAGMENTED_RUNS: [u8; 38] = [
    0x33, 0x20, 0xC8, 0x00, 0x00, 0x00, 0x0C, // 51232 clusters @ 786432
    0x33, 0x00, 0x01, 0x00, 0x00, 0x10, 0x00, // 256 @ +4096
    0x32, 0x80, 0x00, 0x00, 0xF8, 0xFF, // 128 @ -2048
    0x21, 0x10, 0x00, 0x04, // 16 @ +1024
    0x11, 0x20, 0x80, // 32 @ -128
    0x31, 0x08, 0x00, 0x02, 0x00, // 8 @ +512
    0x22, 0x40, 0x00, 0x00, 0xFF, // 64 @ -256
    0x00,
];
pub const FRAGMENTED_RUNS_SIZE: u64 = 51_736 * 4096;

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

pub fn boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    mft_cluster: i64,
    record_code: u8,
) -> Vec<u8> {
    let mut s = vec![0u8; 512];
    s[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    s[3..11].copy_from_slice(b"NTFS    ");
    put_u16(&mut s, 0x0B, bytes_per_sector);
    s[0x0D] = sectors_per_cluster;
    s[0x15] = 0xF8;
    put_u64(&mut s, 0x28, 0x0010_0000);
    put_u64(&mut s, 0x30, mft_cluster as u64);
    put_u64(&mut s, 0x38, 2);
    s[0x40] = record_code;
    s[0x44] = 0x01;
    put_u64(&mut s, 0x48, 0x1234_5678_9ABC_DEF0);
    s[0x1FE] = 0x55;
    s[0x1FF] = 0xAA;
    s
}

fn named_attr_header(type_code: u32, name: &str, value: &[u8]) -> Vec<u8> {
    let name_raw = utf16(name);
    let value_offset = align8(0x18 + name_raw.len());
    let length = align8(value_offset + value.len());
    let mut a = vec![0u8; length];
    put_u32(&mut a, 0x00, type_code);
    put_u32(&mut a, 0x04, length as u32);
    a[0x09] = name.encode_utf16().count() as u8;
    put_u16(&mut a, 0x0A, 0x18);
    put_u32(&mut a, 0x10, value.len() as u32);
    put_u16(&mut a, 0x14, value_offset as u16);
    a[0x18..0x18 + name_raw.len()].copy_from_slice(&name_raw);
    a[value_offset..value_offset + value.len()].copy_from_slice(value);
    a
}

pub fn resident_attr(type_code: u32, value: &[u8]) -> Vec<u8> {
    named_attr_header(type_code, "", value)
}

pub fn named_resident_attr(type_code: u32, name: &str, value: &[u8]) -> Vec<u8> {
    named_attr_header(type_code, name, value)
}

pub fn non_resident_attr(type_code: u32, runs: &[u8], lowest_vcn: u64, real_size: u64) -> Vec<u8> {
    let length = align8(0x40 + runs.len());
    let mut a = vec![0u8; length];
    put_u32(&mut a, 0x00, type_code);
    put_u32(&mut a, 0x04, length as u32);
    a[0x08] = 1;
    put_u16(&mut a, 0x0A, 0x40);
    put_u64(&mut a, 0x10, lowest_vcn);
    put_u16(&mut a, 0x20, 0x40);
    let allocated = real_size.div_ceil(CLUSTER_SIZE as u64) * CLUSTER_SIZE as u64;
    put_u64(&mut a, 0x28, allocated);
    put_u64(&mut a, 0x30, real_size);
    put_u64(&mut a, 0x38, real_size);
    a[0x40..0x40 + runs.len()].copy_from_slice(runs);
    a
}

pub fn standard_information_attr() -> Vec<u8> {
    let mut v = vec![0u8; 0x48];
    for i in 0..4 {
        put_u64(&mut v, i * 8, SAMPLE_FILETIME);
    }
    put_u32(&mut v, 0x20, 0x20);
    resident_attr(0x10, &v)
}

pub fn file_name_value(parent_ref: u64, name: &str, namespace: u8, flags: u32) -> Vec<u8> {
    let name_raw = utf16(name);
    let mut v = vec![0u8; 0x42 + name_raw.len()];
    put_u64(&mut v, 0x00, parent_ref);
    for i in 0..4 {
        put_u64(&mut v, 0x08 + i * 8, SAMPLE_FILETIME);
    }
    put_u32(&mut v, 0x38, flags);
    v[0x40] = name.encode_utf16().count() as u8;
    v[0x41] = namespace;
    v[0x42..].copy_from_slice(&name_raw);
    v
}

pub fn file_name_attr(parent_ref: u64, name: &str, namespace: u8, flags: u32) -> Vec<u8> {
    resident_attr(0x30, &file_name_value(parent_ref, name, namespace, flags))
}

/// Entries are `(attribute type, referenced record, starting vcn)`.
pub fn attribute_list_value(entries: &[(u32, u64, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (attr_type, record, vcn) in entries {
        let mut e = vec![0u8; 0x20];
        put_u32(&mut e, 0x00, *attr_type);
        put_u16(&mut e, 0x04, 0x20);
        e[0x07] = 0x1A;
        put_u64(&mut e, 0x08, *vcn);
        put_u64(&mut e, 0x10, *record | (1u64 << 48));
        out.extend_from_slice(&e);
    }
    out
}

/// Assembles a 1 KiB FILE record with update-sequence protection applied.
pub struct RecordBuilder {
    number: u32,
    flags: u16,
    base: u64,
    attrs: Vec<Vec<u8>>,
}

impl RecordBuilder {
    pub fn new(number: u32, flags: u16) -> Self {
        Self {
            number,
            flags,
            base: 0,
            attrs: Vec::new(),
        }
    }

    pub fn base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn attr(mut self, attr: Vec<u8>) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(b"FILE");
        put_u16(&mut buf, 0x04, 0x30);
        put_u16(&mut buf, 0x06, 3);
        put_u64(&mut buf, 0x08, 0x1000);
        put_u16(&mut buf, 0x10, 1);
        put_u16(&mut buf, 0x12, 1);
        put_u16(&mut buf, 0x14, 0x38);
        put_u16(&mut buf, 0x16, self.flags);
        put_u32(&mut buf, 0x1C, RECORD_SIZE as u32);
        put_u64(&mut buf, 0x20, self.base);
        put_u16(&mut buf, 0x28, self.attrs.len() as u16);
        put_u32(&mut buf, 0x2C, self.number);

        let mut pos = 0x38;
        for attr in &self.attrs {
            assert!(pos + attr.len() + 8 <= RECORD_SIZE, "attributes overflow the record");
            buf[pos..pos + attr.len()].copy_from_slice(attr);
            pos += attr.len();
        }
        put_u32(&mut buf, pos, 0xFFFF_FFFF);
        put_u32(&mut buf, 0x18, (pos + 8) as u32);

        buf[0x30..0x32].copy_from_slice(&UPDATE_SEQUENCE);
        for i in 1..=2 {
            let end = i * 512 - 2;
            let usa = 0x30 + 2 * i;
            let (tail0, tail1) = (buf[end], buf[end + 1]);
            buf[usa] = tail0;
            buf[usa + 1] = tail1;
            buf[end..end + 2].copy_from_slice(&UPDATE_SEQUENCE);
        }
        buf
    }
}

// Layout of the synthetic volume: 4 KiB clusters, $MFT split over clusters
// 4-5 (records 0-7) and 10-11 (records 8-15).
pub const VOLUME_CLUSTERS: usize = 24;
pub const MFT_RUNS: [u8; 7] = [0x11, 0x02, 0x04, 0x11, 0x02, 0x06, 0x00];
pub const MFT_SIZE: u64 = 16 * RECORD_SIZE as u64;
pub const SAM_CLUSTER: usize = 20;
pub const SAM_SIZE: usize = 100;
pub const SYSTEM_CLUSTER: usize = 22;
pub const SYSTEM_SIZE: usize = 50;

pub fn record_offset(record: usize) -> usize {
    if record < 8 {
        4 * CLUSTER_SIZE + record * RECORD_SIZE
    } else {
        10 * CLUSTER_SIZE + (record - 8) * RECORD_SIZE
    }
}

pub fn sam_contents() -> Vec<u8> {
    (0..SAM_SIZE).map(|i| b"regf"[i % 4]).collect()
}

pub fn system_contents() -> Vec<u8> {
    (0..SYSTEM_SIZE).map(|i| (i as u8).wrapping_mul(3)).collect()
}

const DIR_FLAGS: u32 = 0x1000_0000;

/// A small but complete NTFS volume:
///
/// ```text
/// 0  $MFT                     8  Windows\System32\config\
/// 5  .  (root)                9  ...\config\SAM          (non-resident)
/// 6  Windows\                10  notes.txt               (resident)
/// 7  Windows\System32\       11  ...\config\SYSTEM       (attribute list -> 12)
///                            12  extension of 11 holding $DATA
///                            13  ...\config\SECURITY     (deleted)
///                            15  lost\                   (parent 99, orphan)
/// ```
pub fn volume() -> Vec<u8> {
    let mut disk = vec![0u8; VOLUME_CLUSTERS * CLUSTER_SIZE];
    disk[..512].copy_from_slice(&boot_sector(512, 8, 4, 0xF6));

    let records: Vec<(usize, Vec<u8>)> = vec![
        (
            0,
            RecordBuilder::new(0, 0x01)
                .attr(standard_information_attr())
                .attr(file_name_attr(5, "$MFT", 3, 0x06))
                .attr(non_resident_attr(0x80, &MFT_RUNS, 0, MFT_SIZE))
                .build(),
        ),
        (
            5,
            RecordBuilder::new(5, 0x03)
                .attr(standard_information_attr())
                .attr(file_name_attr(5, ".", 3, DIR_FLAGS))
                .build(),
        ),
        (
            6,
            RecordBuilder::new(6, 0x03)
                .attr(file_name_attr(5, "WINDOWS", 2, DIR_FLAGS))
                .attr(file_name_attr(5, "Windows", 1, DIR_FLAGS))
                .build(),
        ),
        (
            7,
            RecordBuilder::new(7, 0x03)
                .attr(file_name_attr(6, "System32", 3, DIR_FLAGS))
                .build(),
        ),
        (
            8,
            RecordBuilder::new(8, 0x03)
                .attr(file_name_attr(7, "config", 3, DIR_FLAGS))
                .build(),
        ),
        (
            9,
            RecordBuilder::new(9, 0x01)
                .attr(standard_information_attr())
                .attr(file_name_attr(8, "SAM", 3, 0x20))
                .attr(non_resident_attr(
                    0x80,
                    &[0x11, 0x01, SAM_CLUSTER as u8, 0x00],
                    0,
                    SAM_SIZE as u64,
                ))
                .build(),
        ),
        (
            10,
            RecordBuilder::new(10, 0x01)
                .attr(file_name_attr(5, "notes.txt", 1, 0x20))
                .attr(resident_attr(0x80, b"hello"))
                .build(),
        ),
        (
            11,
            RecordBuilder::new(11, 0x01)
                .attr(standard_information_attr())
                .attr(resident_attr(
                    0x20,
                    &attribute_list_value(&[(0x10, 11, 0), (0x30, 11, 0), (0x80, 12, 0)]),
                ))
                .attr(file_name_attr(8, "SYSTEM", 3, 0x20))
                .build(),
        ),
        (
            12,
            RecordBuilder::new(12, 0x01)
                .base(11 | (1u64 << 48))
                .attr(non_resident_attr(
                    0x80,
                    &[0x11, 0x01, SYSTEM_CLUSTER as u8, 0x00],
                    0,
                    SYSTEM_SIZE as u64,
                ))
                .build(),
        ),
        (
            13,
            RecordBuilder::new(13, 0x00)
                .attr(file_name_attr(8, "SECURITY", 3, 0x20))
                .attr(resident_attr(0x80, b"stale"))
                .build(),
        ),
        (
            15,
            RecordBuilder::new(15, 0x03)
                .attr(file_name_attr(99, "lost", 1, DIR_FLAGS))
                .build(),
        ),
    ];

    for (number, raw) in records {
        let at = record_offset(number);
        disk[at..at + RECORD_SIZE].copy_from_slice(&raw);
    }

    let sam = SAM_CLUSTER * CLUSTER_SIZE;
    disk[sam..sam + SAM_SIZE].copy_from_slice(&sam_contents());
    let system = SYSTEM_CLUSTER * CLUSTER_SIZE;
    disk[system..system + SYSTEM_SIZE].copy_from_slice(&system_contents());
    disk
}

// Layout of the fragmented volume: 512-byte clusters, $MFT in two extents.
// Record 0 holds the first extent and lists record 3 as the holder of the
// second, so record 4 straddles the two.
pub const SMALL_CLUSTER: usize = 512;
pub const FRAGMENTED_VOLUME_CLUSTERS: usize = 128;
pub const MFT_EXTENTS: [(usize, usize); 2] = [
    (16 * SMALL_CLUSTER, 9 * SMALL_CLUSTER),
    (64 * SMALL_CLUSTER, 23 * SMALL_CLUSTER),
];
pub const SOFTWARE_LIST_CLUSTER: usize = 100;
pub const SOFTWARE_CLUSTER: usize = 110;
pub const SOFTWARE_SIZE: usize = 700;

pub fn software_contents() -> Vec<u8> {
    (0..SOFTWARE_SIZE).map(|i| (i % 13) as u8 + b'a').collect()
}

/// Copy `bytes` to stream position `pos` of a file laid out over `extents`.
fn write_through_extents(disk: &mut [u8], extents: &[(usize, usize)], pos: usize, bytes: &[u8]) {
    let mut skip = pos;
    let mut rest = bytes;
    for &(start, len) in extents {
        if skip >= len {
            skip -= len;
            continue;
        }
        let take = (len - skip).min(rest.len());
        disk[start + skip..start + skip + take].copy_from_slice(&rest[..take]);
        rest = &rest[take..];
        skip = 0;
        if rest.is_empty() {
            return;
        }
    }
    assert!(rest.is_empty(), "write runs past the extents");
}

/// A volume whose $MFT needs its own attribute list:
///
/// ```text
/// 0  $MFT        $DATA vcn 0-8 here, vcn 9-31 in record 3
/// 3  extension of 0
/// 4  extension of 14, split over both $MFT extents
/// 5  .  (root)
/// 6  Windows\    7  System32\    8  config\
/// 14 ...\config\SOFTWARE   (non-resident attribute list -> 4)
/// ```
pub fn fragmented_volume() -> Vec<u8> {
    let mut disk = vec![0u8; FRAGMENTED_VOLUME_CLUSTERS * SMALL_CLUSTER];
    disk[..512].copy_from_slice(&boot_sector(512, 1, 16, 0xF6));

    let mft_list = attribute_list_value(&[(0x10, 0, 0), (0x30, 0, 0), (0x80, 0, 0), (0x80, 3, 9)]);
    let software_list = attribute_list_value(&[(0x10, 14, 0), (0x30, 14, 0), (0x80, 4, 0)]);
    let list_runs = [0x11, 0x01, SOFTWARE_LIST_CLUSTER as u8, 0x00];
    let data_runs = [0x11, 0x02, SOFTWARE_CLUSTER as u8, 0x00];

    let records: Vec<(usize, Vec<u8>)> = vec![
        (
            0,
            RecordBuilder::new(0, 0x01)
                .attr(standard_information_attr())
                .attr(resident_attr(0x20, &mft_list))
                .attr(file_name_attr(5, "$MFT", 3, 0x06))
                .attr(non_resident_attr(0x80, &[0x11, 0x09, 0x10, 0x00], 0, MFT_SIZE))
                .build(),
        ),
        (
            3,
            RecordBuilder::new(3, 0x01)
                .base(1u64 << 48)
                .attr(non_resident_attr(0x80, &[0x11, 0x17, 0x40, 0x00], 9, 0))
                .build(),
        ),
        (
            4,
            RecordBuilder::new(4, 0x01)
                .base(14 | (1u64 << 48))
                .attr(non_resident_attr(0x80, &data_runs, 0, SOFTWARE_SIZE as u64))
                .build(),
        ),
        (
            5,
            RecordBuilder::new(5, 0x03)
                .attr(file_name_attr(5, ".", 3, DIR_FLAGS))
                .build(),
        ),
        (
            6,
            RecordBuilder::new(6, 0x03)
                .attr(file_name_attr(5, "Windows", 3, DIR_FLAGS))
                .build(),
        ),
        (
            7,
            RecordBuilder::new(7, 0x03)
                .attr(file_name_attr(6, "System32", 3, DIR_FLAGS))
                .build(),
        ),
        (
            8,
            RecordBuilder::new(8, 0x03)
                .attr(file_name_attr(7, "config", 3, DIR_FLAGS))
                .build(),
        ),
        (
            14,
            RecordBuilder::new(14, 0x01)
                .attr(standard_information_attr())
                .attr(non_resident_attr(0x20, &list_runs, 0, software_list.len() as u64))
                .attr(file_name_attr(8, "SOFTWARE", 3, 0x20))
                .build(),
        ),
    ];

    for (number, raw) in records {
        write_through_extents(&mut disk, &MFT_EXTENTS, number * RECORD_SIZE, &raw);
    }

    let list = SOFTWARE_LIST_CLUSTER * SMALL_CLUSTER;
    disk[list..list + software_list.len()].copy_from_slice(&software_list);
    let software = SOFTWARE_CLUSTER * SMALL_CLUSTER;
    disk[software..software + SOFTWARE_SIZE].copy_from_slice(&software_contents());
    disk
}
