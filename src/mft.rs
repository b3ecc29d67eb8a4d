// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! MFT record decoding: signature check, update-sequence fixup, header
//! extraction and a tolerant walk over the attribute area.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::attributes::{
    AttributeList, DataAttribute, FileNameAttribute, RECORD_NUMBER_MASK, StandardInformation,
};
use crate::error::{CollectError, Result};

/// "FILE" followed by the low byte of the usual update sequence offset (0x30).
pub const RECORD_SIGNATURE: &[u8; 5] = b"FILE0";
pub const END_MARKER: u32 = 0xFFFF_FFFF;
/// Fixup stride. Always 512 bytes, whatever the sector size.
pub const FIXUP_SECTOR_SIZE: usize = 512;

pub const MFT_RECORD_NUMBER: u64 = 0;
pub const ROOT_RECORD_NUMBER: u64 = 5;

const HEADER_LEN: usize = 0x30;
const FLAGS_OFFSET: usize = 0x16;
const FLAG_IN_USE: u16 = 0x0001;
const FLAG_DIRECTORY: u16 = 0x0002;
/// Flag byte of an allocated directory record.
const DIRECTORY_CODE: u8 = 0x03;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    EaInformation = 0xD0,
    Ea = 0xE0,
    PropertySet = 0xF0,
}

impl TryFrom<u32> for AttributeType {
    type Error = u32;
    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        use AttributeType::*;
        Ok(match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            other => return Err(other),
        })
    }
}

/// Header found at the very beginning of every FILE record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordHeader {
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub next_attr_id: u16,
    pub record_number: u64,
}

impl RecordHeader {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        c.set_position(4);
        let usa_offset = c.read_u16::<LittleEndian>()?;
        let usa_count = c.read_u16::<LittleEndian>()?;
        let lsn = c.read_u64::<LittleEndian>()?;
        let sequence_number = c.read_u16::<LittleEndian>()?;
        let hard_link_count = c.read_u16::<LittleEndian>()?;
        let attrs_offset = c.read_u16::<LittleEndian>()?;
        let flags = c.read_u16::<LittleEndian>()?;
        let bytes_in_use = c.read_u32::<LittleEndian>()?;
        let bytes_allocated = c.read_u32::<LittleEndian>()?;
        let base_record = c.read_u64::<LittleEndian>()? & RECORD_NUMBER_MASK;
        let next_attr_id = c.read_u16::<LittleEndian>()?;
        c.set_position(0x2C);
        let record_number = c.read_u32::<LittleEndian>()? as u64;
        Ok(Self {
            usa_offset,
            usa_count,
            lsn,
            sequence_number,
            hard_link_count,
            attrs_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_record,
            next_attr_id,
            record_number,
        })
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn is_deleted(&self) -> bool {
        !self.is_in_use()
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Extension records hold overflow attributes of another (base) record.
    pub fn is_extension(&self) -> bool {
        self.base_record != 0
    }
}

/// Location of one attribute inside the fixed-up record buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAttribute {
    pub attr_type: AttributeType,
    pub offset: usize,
    pub length: usize,
}

/// A validated, fixed-up MFT record.
#[derive(Debug, Clone)]
pub struct MftRecord {
    pub header: RecordHeader,
    pub data: Vec<u8>,
    pub attributes: Vec<RawAttribute>,
}

/// Quick classification on the raw (not yet fixed-up) flag byte.
pub fn is_directory_record(raw: &[u8]) -> bool {
    raw.get(FLAGS_OFFSET) == Some(&DIRECTORY_CODE)
}

/// Undo the update-sequence protection in place.
///
/// Each 512-byte stride ends with a copy of the update sequence value; the
/// real bytes live in the update sequence array. A stride tail that already
/// holds its array value counts as fixed, so applying this twice changes
/// nothing. Returns the number of strides that were consistent, failing when
/// none were.
pub fn apply_fixup(buf: &mut [u8], record_id: u64) -> Result<usize> {
    if buf.len() < 8 {
        return Err(CollectError::FixupMismatch(record_id));
    }
    let usa_offset = u16::from_le_bytes([buf[4], buf[5]]) as usize;
    let usa_count = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if usa_count < 2 || usa_offset + 2 * usa_count > buf.len() {
        warn!(
            "Record {}: update sequence array ({} entries at 0x{:X}) does not fit",
            record_id, usa_count, usa_offset
        );
        return Err(CollectError::FixupMismatch(record_id));
    }

    let usn = [buf[usa_offset], buf[usa_offset + 1]];
    let mut consistent = 0usize;

    for i in 1..usa_count {
        let sector_end = i * FIXUP_SECTOR_SIZE - 2;
        if sector_end + 2 > buf.len() {
            break;
        }
        let fix_pos = usa_offset + 2 * i;
        let fix = [buf[fix_pos], buf[fix_pos + 1]];
        let tail = [buf[sector_end], buf[sector_end + 1]];

        if tail == usn {
            buf[sector_end] = fix[0];
            buf[sector_end + 1] = fix[1];
            consistent += 1;
        } else if tail == fix {
            consistent += 1;
        } else {
            debug!("Record {}: torn write in sector {}", record_id, i);
        }
    }

    if consistent == 0 {
        warn!("Record {}: no sector carries the update sequence", record_id);
        return Err(CollectError::FixupMismatch(record_id));
    }
    Ok(consistent)
}

impl MftRecord {
    /// Decode one record-sized buffer. `volume_offset` only labels errors.
    pub fn from_bytes(raw: &[u8], volume_offset: u64) -> Result<Self> {
        if raw.len() < HEADER_LEN + 8 || &raw[..RECORD_SIGNATURE.len()] != RECORD_SIGNATURE {
            trace!("No FILE0 signature at 0x{:X}", volume_offset);
            return Err(CollectError::NotAnMftRecord(volume_offset));
        }

        // fixup patches sector tails, so work on a copy
        let mut buf = raw.to_vec();
        let header = RecordHeader::parse(&buf)?;
        apply_fixup(&mut buf, header.record_number)?;

        let (attributes, end) = walk_attributes(&buf, header.attrs_offset as usize);
        if let Some(end) = end {
            buf.truncate(end);
        }

        Ok(MftRecord {
            header,
            data: buf,
            attributes,
        })
    }

    pub fn record_number(&self) -> u64 {
        self.header.record_number
    }

    pub fn attribute_bytes(&self, attr: &RawAttribute) -> &[u8] {
        &self.data[attr.offset..attr.offset + attr.length]
    }

    pub fn attributes_of(&self, attr_type: AttributeType) -> impl Iterator<Item = &[u8]> + '_ {
        self.attributes
            .iter()
            .filter(move |a| a.attr_type == attr_type)
            .map(|a| self.attribute_bytes(a))
    }

    pub fn standard_information(&self) -> Option<Result<StandardInformation>> {
        self.attributes_of(AttributeType::StandardInformation)
            .next()
            .map(StandardInformation::from_attribute)
    }

    /// Every $FILE_NAME that decodes; a record may carry several.
    pub fn file_names(&self) -> Vec<FileNameAttribute> {
        self.attributes_of(AttributeType::FileName)
            .filter_map(|raw| match FileNameAttribute::from_attribute(raw) {
                Ok(f) => Some(f),
                Err(e) => {
                    debug!("Record {}: skipping $FILE_NAME: {}", self.record_number(), e);
                    None
                }
            })
            .collect()
    }

    /// The name to use for this record: WIN32 first, then WIN32&DOS, POSIX, DOS.
    pub fn canonical_name(&self) -> Option<FileNameAttribute> {
        self.file_names()
            .into_iter()
            .min_by_key(|f| f.namespace.preference())
    }

    /// The unnamed $DATA stream held by this record.
    pub fn data(&self, bytes_per_cluster: u64) -> Option<Result<DataAttribute>> {
        self.attributes_of(AttributeType::Data)
            .map(|raw| DataAttribute::from_attribute(raw, bytes_per_cluster))
            .find(|d| !matches!(d, Ok(d) if !d.is_unnamed()))
    }

    pub fn attribute_list(&self, bytes_per_cluster: u64) -> Option<Result<AttributeList>> {
        self.attributes_of(AttributeType::AttributeList)
            .next()
            .map(|raw| AttributeList::from_attribute(raw, bytes_per_cluster))
    }
}

/// Walk attributes from `start`. Stops at the end marker (returned as the
/// trim point), at an unknown type code, or when an attribute would run past
/// the buffer.
fn walk_attributes(buf: &[u8], start: usize) -> (Vec<RawAttribute>, Option<usize>) {
    let mut attributes = Vec::new();
    let mut pos = start;

    loop {
        if pos + 4 > buf.len() {
            return (attributes, None);
        }
        let type_code = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        if type_code == END_MARKER {
            return (attributes, Some(pos));
        }
        let attr_type = match AttributeType::try_from(type_code) {
            Ok(t) => t,
            Err(code) => {
                debug!("Unknown attribute type 0x{:X} at 0x{:X}, stopping", code, pos);
                return (attributes, None);
            }
        };
        if pos + 8 > buf.len() {
            return (attributes, None);
        }
        let length =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]) as usize;
        if length < 0x10 || pos + length > buf.len() {
            debug!(
                "Attribute 0x{:X} at 0x{:X} has length {}, stopping",
                type_code, pos, length
            );
            return (attributes, None);
        }
        attributes.push(RawAttribute {
            attr_type,
            offset: pos,
            length,
        });
        pos += length;
    }
}
