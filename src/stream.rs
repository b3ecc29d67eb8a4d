//! Present a list of scattered extents as one continuous byte stream.

use log::trace;
use std::io::{self, Read};

use crate::error::CollectError;
use crate::runs::DataRun;
use crate::volume::VolumeSource;

/// Sequential reader over the extents of one stream.
///
/// The volume is seeked once when a run is entered, never per read call.
/// The stream ends when the declared size has been served, even if the runs
/// describe more bytes than that.
pub struct ExtentReader<V> {
    volume: V,
    runs: Vec<DataRun>,
    run_index: usize,
    run_remaining: u64,
    needs_seek: bool,
    total_read: u64,
    size: u64,
}

impl<V: VolumeSource> ExtentReader<V> {
    /// `size` overrides the sum of run lengths, e.g. with the real size of a
    /// file whose last cluster is only partly used.
    pub fn new(volume: V, runs: Vec<DataRun>, size: Option<u64>) -> Self {
        let allocated: u64 = runs.iter().map(|r| r.length).sum();
        let run_remaining = runs.first().map_or(0, |r| r.length);
        Self {
            volume,
            runs,
            run_index: 0,
            run_remaining,
            needs_seek: true,
            total_read: 0,
            size: size.unwrap_or(allocated),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// The run holding the next byte, and how much of it is left.
    fn position(&self) -> Option<(&DataRun, u64)> {
        let mut index = self.run_index;
        let mut remaining = self.run_remaining;
        while remaining == 0 {
            index += 1;
            remaining = self.runs.get(index)?.length;
        }
        Some((&self.runs[index], remaining))
    }

    /// Volume byte offset of the next byte this reader will serve.
    pub fn volume_offset(&self) -> Option<u64> {
        let (run, remaining) = self.position()?;
        (!run.sparse).then(|| run.offset + (run.length - remaining))
    }

    /// Bytes left before the reader has to move on to another run.
    pub fn contiguous_remaining(&self) -> u64 {
        self.position().map_or(0, |(_, remaining)| remaining)
    }

    pub fn into_inner(self) -> V {
        self.volume
    }

    fn advance_run(&mut self) -> bool {
        while self.run_remaining == 0 {
            self.run_index += 1;
            match self.runs.get(self.run_index) {
                Some(run) => {
                    self.run_remaining = run.length;
                    self.needs_seek = true;
                }
                None => return false,
            }
        }
        true
    }
}

impl<V: VolumeSource> Read for ExtentReader<V> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.runs.is_empty() {
            return Err(CollectError::UnexpectedEndOfStream.into());
        }
        if self.total_read >= self.size || buf.is_empty() {
            return Ok(0);
        }
        if !self.advance_run() {
            // runs described fewer bytes than the declared size
            return Err(CollectError::UnexpectedEndOfStream.into());
        }

        let run = self.runs[self.run_index];
        let wanted = (buf.len() as u64)
            .min(self.run_remaining)
            .min(self.size - self.total_read) as usize;

        let n = if run.sparse {
            buf[..wanted].fill(0);
            wanted
        } else {
            if self.needs_seek {
                let at = run.offset + (run.length - self.run_remaining);
                trace!("extent reader: run {} seek to 0x{:X}", self.run_index, at);
                self.volume.seek_to(at)?;
                self.needs_seek = false;
            }
            let n = self.volume.read_bytes(&mut buf[..wanted])?;
            if n == 0 {
                return Err(CollectError::UnexpectedEndOfStream.into());
            }
            n
        };

        self.run_remaining -= n as u64;
        self.total_read += n as u64;
        Ok(n)
    }
}
