//! Data-run (mapping pairs) decoding.
//!
//! Each run starts with a header byte: the low nibble is the width of the
//! cluster count, the high nibble the width of the signed cluster delta that
//! follows it. Deltas accumulate across runs, so a run can never be placed on
//! its own.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{CollectError, Result};

/// One contiguous extent of a stream, in absolute volume bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRun {
    pub offset: u64,
    pub length: u64,
    /// Unallocated hole, reads back as zeros.
    pub sparse: bool,
}

impl DataRun {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            sparse: false,
        }
    }

    pub fn sparse(length: u64) -> Self {
        Self {
            offset: 0,
            length,
            sparse: true,
        }
    }
}

/// Read a little-endian field of `width` bytes and sign-extend it to 64 bits.
fn read_signed(raw: &[u8], pos: usize, width: usize) -> Result<i64> {
    if width > 8 {
        return Err(CollectError::InvalidDataRun(format!(
            "field width {} exceeds 8 bytes",
            width
        )));
    }
    let field = raw.get(pos..pos + width).ok_or_else(|| {
        CollectError::InvalidDataRun(format!(
            "field of {} bytes at {} runs past {} bytes",
            width,
            pos,
            raw.len()
        ))
    })?;
    let mut value = 0i64;
    for (i, b) in field.iter().enumerate() {
        value |= (*b as i64) << (8 * i);
    }
    if width > 0 && width < 8 && field[width - 1] & 0x80 != 0 {
        value |= !0i64 << (width * 8);
    }
    Ok(value)
}

/// Decode a run list into absolute byte extents.
pub fn decode_data_runs(raw: &[u8], bytes_per_cluster: u64) -> Result<Vec<DataRun>> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut lcn: i64 = 0;

    while pos < raw.len() && raw[pos] != 0 {
        let header = raw[pos];
        pos += 1;
        let len_size = (header & 0x0F) as usize;
        let ofs_size = (header >> 4) as usize;

        let clusters = read_signed(raw, pos, len_size)?;
        pos += len_size;
        if clusters <= 0 {
            return Err(CollectError::InvalidDataRun(format!(
                "run {} has cluster count {}",
                runs.len(),
                clusters
            )));
        }
        let length = (clusters as u64).checked_mul(bytes_per_cluster).ok_or_else(|| {
            CollectError::InvalidDataRun(format!("run {} length overflows", runs.len()))
        })?;

        if ofs_size == 0 {
            runs.push(DataRun::sparse(length));
            continue;
        }

        let delta = read_signed(raw, pos, ofs_size)?;
        pos += ofs_size;
        lcn = lcn.checked_add(delta).filter(|v| *v >= 0).ok_or_else(|| {
            CollectError::InvalidDataRun(format!(
                "run {} moves the cluster position to an invalid value",
                runs.len()
            ))
        })?;

        let offset = (lcn as u64).checked_mul(bytes_per_cluster).ok_or_else(|| {
            CollectError::InvalidDataRun(format!("run {} offset overflows", runs.len()))
        })?;
        trace!("data run: lcn={} offset=0x{:X} length={}", lcn, offset, length);
        runs.push(DataRun::new(offset, length));
    }
    Ok(runs)
}
