// Sources:
// - https://en.wikipedia.org/wiki/NTFS

//! Parse an NTFS Partition-Boot-Sector with std::io::Cursor

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};

use crate::error::{CollectError, Result};

pub const BOOT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionBootSector {
    /* -- 0x00-0x0A ------------------------------------------ */
    pub jump_instruction: [u8; 3], // x86 JMP + NOP
    pub oem_id: [u8; 8],           // "NTFS    "

    /* -- BIOS Parameter Block (BPB) - 0x0B-0x23 ------------- */
    pub bytes_per_sector: u16,   // 0x0B
    pub sectors_per_cluster: u8, // 0x0D
    pub reserved_sectors: u16,   // 0x0E
    pub media_descriptor: u8,    // 0x15 (0xF8 = hard disk)
    pub sectors_per_track: u16,  // 0x18
    pub number_of_heads: u16,    // 0x1A
    pub hidden_sectors: u32,     // 0x1C

    /* -- Extended BPB - 0x28-0x53 ---------------------------- */
    pub total_sectors: u64,            // 0x28
    pub mft_cluster: i64,              // 0x30
    pub mft_mirror_cluster: i64,       // 0x38
    pub clusters_per_file_record: u8,  // 0x40 (signed exponent when >= 0x80)
    pub clusters_per_index_buffer: i8, // 0x44
    pub volume_serial_number: u64,     // 0x48

    pub end_of_sector_marker: u16, // 0x1FE (0xAA55)
}

/// Geometry the rest of the engine needs, derived from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u64,
    pub mft_byte_offset: u64,
    pub mft_record_size: u32,
    pub clusters_per_index_record: i8,
}

impl PartitionBootSector {
    pub const NTFS_SIGNATURE: [u8; 4] = *b"NTFS";

    /// Parse the 512-byte sector into `PartitionBootSector`
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(CollectError::InvalidBootRecord(format!(
                "boot sector must be {} bytes, got {}",
                BOOT_SECTOR_SIZE,
                buf.len()
            )));
        }
        let mut c = Cursor::new(buf);

        /* helper macros to reduce boilerplate */
        macro_rules! read_array {
            ($len:expr) => {{
                let mut tmp = [0u8; $len];
                c.read_exact(&mut tmp)?;
                tmp
            }};
        }
        macro_rules! skip {
            ($len:expr) => {{
                c.set_position(c.position() + $len);
            }};
        }

        let jump_instruction = read_array!(3);
        let oem_id = read_array!(8);
        let bytes_per_sector = c.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = c.read_u8()?;
        let reserved_sectors = c.read_u16::<LittleEndian>()?;
        skip!(5);
        let media_descriptor = c.read_u8()?;
        skip!(2);
        let sectors_per_track = c.read_u16::<LittleEndian>()?;
        let number_of_heads = c.read_u16::<LittleEndian>()?;
        let hidden_sectors = c.read_u32::<LittleEndian>()?;
        skip!(8);
        let total_sectors = c.read_u64::<LittleEndian>()?;
        let mft_cluster = c.read_i64::<LittleEndian>()?;
        let mft_mirror_cluster = c.read_i64::<LittleEndian>()?;
        let clusters_per_file_record = c.read_u8()?;
        skip!(3);
        let clusters_per_index_buffer = c.read_i8()?;
        skip!(3);
        let volume_serial_number = c.read_u64::<LittleEndian>()?;
        c.set_position(0x1FE);
        let end_of_sector_marker = c.read_u16::<LittleEndian>()?;

        Ok(Self {
            jump_instruction,
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            media_descriptor,
            sectors_per_track,
            number_of_heads,
            hidden_sectors,
            total_sectors,
            mft_cluster,
            mft_mirror_cluster,
            clusters_per_file_record,
            clusters_per_index_buffer,
            volume_serial_number,
            end_of_sector_marker,
        })
    }

    /// Check if the oem_id carries the NTFS signature
    pub fn signature_is_valid(&self) -> bool {
        self.oem_id[..4] == Self::NTFS_SIGNATURE
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Bytes per file-record segment.
    ///
    /// Only the byte-exponent encoding is accepted: a raw value below 0x80 is
    /// a cluster count, which no supported volume uses.
    pub fn file_record_size(&self) -> Result<u32> {
        let raw = self.clusters_per_file_record;
        if raw < 0x80 {
            return Err(CollectError::UnsupportedMftRecordSize(raw));
        }
        let exponent = (raw as i8).unsigned_abs() as u32;
        if exponent >= 32 {
            return Err(CollectError::UnsupportedMftRecordSize(raw));
        }
        Ok(1u32 << exponent)
    }

    pub fn geometry(&self) -> Result<VolumeGeometry> {
        if !self.signature_is_valid() {
            error!(
                "Boot sector signature is not 'NTFS', found: {}",
                String::from_utf8_lossy(&self.oem_id)
            );
            return Err(CollectError::InvalidBootRecord(
                "missing NTFS signature".into(),
            ));
        }
        if self.bytes_per_sector == 0 || self.sectors_per_cluster == 0 {
            return Err(CollectError::InvalidBootRecord(
                "zero sector or cluster size".into(),
            ));
        }
        if self.mft_cluster <= 0 {
            return Err(CollectError::InvalidBootRecord(format!(
                "implausible $MFT cluster {}",
                self.mft_cluster
            )));
        }
        let bytes_per_cluster = self.cluster_size();
        let mft_record_size = self.file_record_size()?;
        let mft_byte_offset = (self.mft_cluster as u64)
            .checked_mul(bytes_per_cluster)
            .ok_or_else(|| CollectError::InvalidBootRecord("$MFT offset overflows".into()))?;

        let geometry = VolumeGeometry {
            bytes_per_sector: self.bytes_per_sector as u32,
            bytes_per_cluster,
            mft_byte_offset,
            mft_record_size,
            clusters_per_index_record: self.clusters_per_index_buffer,
        };
        debug!("Volume geometry: {:?}", geometry);
        Ok(geometry)
    }
}

impl VolumeGeometry {
    /// Parse the first sector of a volume straight into its geometry.
    pub fn from_boot_sector(buf: &[u8]) -> Result<Self> {
        PartitionBootSector::from_bytes(buf)?.geometry()
    }
}

impl fmt::Display for VolumeGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Volume Geometry"]);
        table.add_row(row![b -> "Bytes per sector", self.bytes_per_sector]);
        table.add_row(row![b -> "Bytes per cluster", self.bytes_per_cluster]);
        table.add_row(row![b -> "MFT record size", self.mft_record_size]);
        table.add_row(row![b -> "$MFT offset", format!("0x{:X}", self.mft_byte_offset)]);
        table.add_row(row![b -> "Clusters per index record", self.clusters_per_index_record]);
        write!(f, "{}", table)
    }
}
