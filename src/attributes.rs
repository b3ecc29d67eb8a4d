// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://flatcap.github.io/linux-ntfs/ntfs/attributes/index.html

//! Decoders for the four attribute types needed to locate and size a file:
//! $STANDARD_INFORMATION, $FILE_NAME, $DATA and $ATTRIBUTE_LIST.
//!
//! Every decoder takes the complete attribute (common header included) as
//! produced by [`crate::mft::MftRecord::attribute_bytes`].

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

use crate::error::{CollectError, Result};
use crate::runs::{DataRun, decode_data_runs};

/// 100-ns ticks between 1601-01-01 and 1970-01-01.
pub const WINDOWS_EPOCH_DELTA: i64 = 116_444_736_000_000_000;

const RESIDENT_HEADER_LEN: usize = 0x18;
const NON_RESIDENT_HEADER_LEN: usize = 0x40;
const FILE_NAME_MIN_LEN: usize = 0x42;
const STANDARD_INFORMATION_MIN_LEN: usize = 0x30;
const ATTRIBUTE_LIST_ENTRY_MIN_LEN: usize = 0x1A;

/// Low 48 bits of a file reference are the record number.
pub const RECORD_NUMBER_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    if ft == 0 {
        return None;
    }
    let unix_ticks = i64::try_from(ft).ok()?.checked_sub(WINDOWS_EPOCH_DELTA)?;
    let secs = unix_ticks.div_euclid(10_000_000);
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn utf16le_to_string(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn invalid(msg: impl Into<String>) -> CollectError {
    CollectError::InvalidAttribute(msg.into())
}

/// Header part shared by resident and non-resident attributes.
#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub type_code: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub id: u16,
}

impl AttributeHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 0x10 {
            return Err(invalid("attribute shorter than its common header"));
        }
        let mut c = Cursor::new(raw);
        let type_code = c.read_u32::<LittleEndian>()?;
        let length = c.read_u32::<LittleEndian>()?;
        let non_resident = c.read_u8()? != 0;
        let name_length = c.read_u8()?;
        let name_offset = c.read_u16::<LittleEndian>()?;
        let flags = c.read_u16::<LittleEndian>()?;
        let id = c.read_u16::<LittleEndian>()?;
        if (length as usize) > raw.len() {
            return Err(invalid(format!(
                "attribute 0x{:X} declares {} bytes but only {} remain",
                type_code,
                length,
                raw.len()
            )));
        }
        Ok(Self {
            type_code,
            length,
            non_resident,
            name_length,
            name_offset,
            flags,
            id,
        })
    }

    pub fn name(&self, raw: &[u8]) -> Option<String> {
        if self.name_length == 0 {
            return None;
        }
        let start = self.name_offset as usize;
        let end = start + self.name_length as usize * 2;
        raw.get(start..end).map(utf16le_to_string)
    }
}

/// Borrow the value of a resident attribute.
fn resident_value<'a>(raw: &'a [u8], header: &AttributeHeader) -> Result<&'a [u8]> {
    if header.non_resident {
        return Err(invalid(format!(
            "attribute 0x{:X} must be resident",
            header.type_code
        )));
    }
    if raw.len() < RESIDENT_HEADER_LEN {
        return Err(invalid("resident header truncated"));
    }
    let mut c = Cursor::new(&raw[0x10..]);
    let value_length = c.read_u32::<LittleEndian>()? as usize;
    let value_offset = c.read_u16::<LittleEndian>()? as usize;
    let end = value_offset + value_length;
    if end > header.length as usize {
        return Err(invalid(format!(
            "resident value {}..{} overruns attribute of {} bytes",
            value_offset, end, header.length
        )));
    }
    Ok(&raw[value_offset..end])
}

/// Non-resident header fields that matter for sizing and run decoding.
#[derive(Debug, Clone, Copy)]
struct NonResidentHeader {
    lowest_vcn: u64,
    runs_offset: u16,
    allocated_size: u64,
    real_size: u64,
}

fn non_resident_header(raw: &[u8], header: &AttributeHeader) -> Result<NonResidentHeader> {
    if (header.length as usize) < NON_RESIDENT_HEADER_LEN || raw.len() < NON_RESIDENT_HEADER_LEN
    {
        return Err(invalid("non-resident header truncated"));
    }
    let mut c = Cursor::new(&raw[0x10..]);
    let lowest_vcn = c.read_u64::<LittleEndian>()?;
    let _highest_vcn = c.read_u64::<LittleEndian>()?;
    let runs_offset = c.read_u16::<LittleEndian>()?;
    c.set_position(0x18); // 0x28 in the attribute
    let allocated_size = c.read_u64::<LittleEndian>()?;
    let real_size = c.read_u64::<LittleEndian>()?;
    if runs_offset as usize > header.length as usize {
        return Err(invalid(format!(
            "data run offset {} outside attribute of {} bytes",
            runs_offset, header.length
        )));
    }
    Ok(NonResidentHeader {
        lowest_vcn,
        runs_offset,
        allocated_size,
        real_size,
    })
}

/// DOS-style attribute bits carried by $STANDARD_INFORMATION and $FILE_NAME.
/// Each bit decodes on its own; none implies another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributeFlags {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub archive: bool,
    pub device: bool,
    pub normal: bool,
    pub temporary: bool,
    pub sparse_file: bool,
    pub reparse_point: bool,
    pub compressed: bool,
    pub offline: bool,
    pub not_content_indexed: bool,
    pub encrypted: bool,
    pub directory: bool,
    pub index_view: bool,
}

impl FileAttributeFlags {
    pub fn from_bits(bits: u32) -> Self {
        let set = |mask: u32| bits & mask != 0;
        Self {
            read_only: set(0x0001),
            hidden: set(0x0002),
            system: set(0x0004),
            archive: set(0x0020),
            device: set(0x0040),
            normal: set(0x0080),
            temporary: set(0x0100),
            sparse_file: set(0x0200),
            reparse_point: set(0x0400),
            compressed: set(0x0800),
            offline: set(0x1000),
            not_content_indexed: set(0x2000),
            encrypted: set(0x4000),
            directory: set(0x1000_0000),
            index_view: set(0x2000_0000),
        }
    }
}

impl fmt::Display for FileAttributeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.read_only, "READONLY"),
            (self.hidden, "HIDDEN"),
            (self.system, "SYSTEM"),
            (self.archive, "ARCHIVE"),
            (self.device, "DEVICE"),
            (self.normal, "NORMAL"),
            (self.temporary, "TEMPORARY"),
            (self.sparse_file, "SPARSE_FILE"),
            (self.reparse_point, "REPARSE_POINT"),
            (self.compressed, "COMPRESSED"),
            (self.offline, "OFFLINE"),
            (self.not_content_indexed, "NOT_CONTENT_INDEXED"),
            (self.encrypted, "ENCRYPTED"),
            (self.directory, "DIRECTORY"),
            (self.index_view, "INDEX_VIEW"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, n)| *n)
            .collect();
        if set.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", set.join(" | "))
        }
    }
}

/// Parsed $STANDARD_INFORMATION.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attributes: FileAttributeFlags,
}

impl StandardInformation {
    pub fn from_attribute(raw: &[u8]) -> Result<Self> {
        let header = AttributeHeader::parse(raw)?;
        let value = resident_value(raw, &header)?;
        if value.len() < STANDARD_INFORMATION_MIN_LEN {
            return Err(invalid(format!(
                "$STANDARD_INFORMATION value is {} bytes",
                value.len()
            )));
        }
        let mut c = Cursor::new(value);
        let created = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let file_attributes = FileAttributeFlags::from_bits(c.read_u32::<LittleEndian>()?);
        Ok(Self {
            created,
            modified,
            mft_modified,
            accessed,
            file_attributes,
        })
    }
}

/// Which naming convention a $FILE_NAME belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Namespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl TryFrom<u8> for Namespace {
    type Error = CollectError;
    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Namespace::Posix,
            1 => Namespace::Win32,
            2 => Namespace::Dos,
            3 => Namespace::Win32AndDos,
            other => return Err(invalid(format!("unknown filename namespace {}", other))),
        })
    }
}

impl Namespace {
    /// Namespaces whose names a person would type. Pure 8.3 names are not.
    pub fn is_human_readable(self) -> bool {
        !matches!(self, Namespace::Dos)
    }

    /// Lower is better when picking one name for a record.
    pub fn preference(self) -> u8 {
        match self {
            Namespace::Win32 => 0,
            Namespace::Win32AndDos => 1,
            Namespace::Posix => 2,
            Namespace::Dos => 3,
        }
    }
}

/// Parsed $FILE_NAME attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNameAttribute {
    pub parent_record: u64,
    pub parent_sequence: u16,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    /// Allocated size.
    pub physical_size: u64,
    /// Real size.
    pub logical_size: u64,
    pub flags: FileAttributeFlags,
    pub namespace: Namespace,
    pub name: String,
}

impl FileNameAttribute {
    pub fn from_attribute(raw: &[u8]) -> Result<Self> {
        let header = AttributeHeader::parse(raw)?;
        let value = resident_value(raw, &header)?;
        Self::from_value(value)
    }

    /// Decode the bare value, as also found in directory index keys.
    pub fn from_value(value: &[u8]) -> Result<Self> {
        if value.len() < FILE_NAME_MIN_LEN {
            return Err(invalid(format!("$FILE_NAME value is {} bytes", value.len())));
        }
        let mut c = Cursor::new(value);
        let parent_raw = c.read_u64::<LittleEndian>()?;
        let created = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let mft_modified = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let accessed = filetime_to_datetime(c.read_u64::<LittleEndian>()?);
        let physical_size = c.read_u64::<LittleEndian>()?;
        let logical_size = c.read_u64::<LittleEndian>()?;
        let flags = FileAttributeFlags::from_bits(c.read_u32::<LittleEndian>()?);
        c.read_u32::<LittleEndian>()?; // reparse value
        let name_len = c.read_u8()? as usize;
        let namespace = Namespace::try_from(c.read_u8()?)?;
        let name_end = FILE_NAME_MIN_LEN + name_len * 2;
        let name_raw = value.get(FILE_NAME_MIN_LEN..name_end).ok_or_else(|| {
            invalid(format!(
                "name of {} characters overruns $FILE_NAME of {} bytes",
                name_len,
                value.len()
            ))
        })?;
        Ok(Self {
            parent_record: parent_raw & RECORD_NUMBER_MASK,
            parent_sequence: (parent_raw >> 48) as u16,
            created,
            modified,
            mft_modified,
            accessed,
            physical_size,
            logical_size,
            flags,
            namespace,
            name: utf16le_to_string(name_raw),
        })
    }
}

/// Where a $DATA stream keeps its bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataContent {
    Resident(Vec<u8>),
    NonResident {
        runs: Vec<DataRun>,
        lowest_vcn: u64,
        allocated_size: u64,
        real_size: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataAttribute {
    pub name: Option<String>,
    pub content: DataContent,
}

impl DataAttribute {
    pub fn from_attribute(raw: &[u8], bytes_per_cluster: u64) -> Result<Self> {
        let header = AttributeHeader::parse(raw)?;
        let name = header.name(raw);
        let content = if header.non_resident {
            let nr = non_resident_header(raw, &header)?;
            let runs = decode_data_runs(
                &raw[nr.runs_offset as usize..header.length as usize],
                bytes_per_cluster,
            )?;
            DataContent::NonResident {
                runs,
                lowest_vcn: nr.lowest_vcn,
                allocated_size: nr.allocated_size,
                real_size: nr.real_size,
            }
        } else {
            DataContent::Resident(resident_value(raw, &header)?.to_vec())
        };
        Ok(Self { name, content })
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_none()
    }

    /// Logical size of the stream, when this fragment carries it.
    ///
    /// Only the fragment starting at VCN 0 holds the real size.
    pub fn size(&self) -> Option<u64> {
        match &self.content {
            DataContent::Resident(bytes) => Some(bytes.len() as u64),
            DataContent::NonResident {
                lowest_vcn,
                real_size,
                ..
            } => (*lowest_vcn == 0).then_some(*real_size),
        }
    }

    pub fn runs(&self) -> &[DataRun] {
        match &self.content {
            DataContent::Resident(_) => &[],
            DataContent::NonResident { runs, .. } => runs,
        }
    }

    pub fn lowest_vcn(&self) -> u64 {
        match &self.content {
            DataContent::Resident(_) => 0,
            DataContent::NonResident { lowest_vcn, .. } => *lowest_vcn,
        }
    }
}

/// One sub-entry of an $ATTRIBUTE_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeListEntry {
    pub attr_type: u32,
    pub entry_length: u16,
    pub name_length: u8,
    pub starting_vcn: u64,
    pub record_number: u64,
    pub record_sequence: u16,
    pub attribute_id: u16,
}

/// An $ATTRIBUTE_LIST is small enough to be resident almost always; when it
/// is not, its bytes have to be fetched from the volume first.
#[derive(Debug, Clone)]
pub enum AttributeList {
    Resident(Vec<AttributeListEntry>),
    NonResident { runs: Vec<DataRun>, real_size: u64 },
}

impl AttributeList {
    pub fn from_attribute(raw: &[u8], bytes_per_cluster: u64) -> Result<Self> {
        let header = AttributeHeader::parse(raw)?;
        if header.non_resident {
            let nr = non_resident_header(raw, &header)?;
            let runs = decode_data_runs(
                &raw[nr.runs_offset as usize..header.length as usize],
                bytes_per_cluster,
            )?;
            Ok(AttributeList::NonResident {
                runs,
                real_size: nr.real_size,
            })
        } else {
            let value = resident_value(raw, &header)?;
            Ok(AttributeList::Resident(decode_attribute_list(value)?))
        }
    }
}

/// Walk the sub-entries of an attribute list value until its length is
/// exhausted.
pub fn decode_attribute_list(value: &[u8]) -> Result<Vec<AttributeListEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + ATTRIBUTE_LIST_ENTRY_MIN_LEN <= value.len() {
        let mut c = Cursor::new(&value[pos..]);
        let attr_type = c.read_u32::<LittleEndian>()?;
        let entry_length = c.read_u16::<LittleEndian>()?;
        let name_length = c.read_u8()?;
        let _name_offset = c.read_u8()?;
        let starting_vcn = c.read_u64::<LittleEndian>()?;
        let reference = c.read_u64::<LittleEndian>()?;
        let attribute_id = c.read_u16::<LittleEndian>()?;

        if (entry_length as usize) < ATTRIBUTE_LIST_ENTRY_MIN_LEN
            || pos + entry_length as usize > value.len()
        {
            return Err(invalid(format!(
                "attribute list entry at {} has bad length {}",
                pos, entry_length
            )));
        }
        entries.push(AttributeListEntry {
            attr_type,
            entry_length,
            name_length,
            starting_vcn,
            record_number: reference & RECORD_NUMBER_MASK,
            record_sequence: (reference >> 48) as u16,
            attribute_id,
        });
        pos += entry_length as usize;
    }
    Ok(entries)
}
