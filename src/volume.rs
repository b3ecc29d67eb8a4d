//! Access to the raw bytes of a volume.
//!
//! The engine only ever seeks, reads and asks where it is. How the handle was
//! obtained (raw device, disk image, in-memory fixture) is up to the
//! [`VolumeProvider`].

use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::pbs::BOOT_SECTOR_SIZE;

/// Read capability over a volume, addressed in volume-relative bytes.
pub trait VolumeSource {
    fn seek_to(&mut self, offset: u64) -> io::Result<u64>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn offset(&mut self) -> io::Result<u64>;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek_to(offset)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_bytes(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<T: Read + Seek> VolumeSource for T {
    fn seek_to(&mut self, offset: u64) -> io::Result<u64> {
        self.seek(SeekFrom::Start(offset))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn offset(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

/// Opens independent read handles onto the same volume.
///
/// Every call must return a handle with its own cursor so that a second
/// reader never disturbs the first.
pub trait VolumeProvider {
    type Source: VolumeSource;

    fn open(&self) -> Result<Self::Source>;

    fn read_boot_sector(&self) -> Result<[u8; BOOT_SECTOR_SIZE]> {
        let mut source = self.open()?;
        let mut sector = [0u8; BOOT_SECTOR_SIZE];
        source.read_exact_at(0, &mut sector)?;
        Ok(sector)
    }
}

/// A window onto a larger byte source, starting at a partition offset.
pub struct PartitionSlice<R> {
    inner: R,
    start: u64,
}

impl<R: Read + Seek> PartitionSlice<R> {
    pub fn new(mut inner: R, start: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start })
    }
}

impl<R: Read> Read for PartitionSlice<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for PartitionSlice<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(self.start + n))?,
            SeekFrom::Current(n) => self.inner.seek(SeekFrom::Current(n))?,
            SeekFrom::End(n) => self.inner.seek(SeekFrom::End(n))?,
        };
        absolute.checked_sub(self.start).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before partition start")
        })
    }
}

/// A raw device (`\\.\C:`) or a dd-style image file, optionally holding the
/// volume at a partition offset.
#[derive(Debug, Clone)]
pub struct ImageVolume {
    path: PathBuf,
    partition_offset: u64,
    buffer_size: usize,
}

impl ImageVolume {
    pub fn new(path: impl Into<PathBuf>, partition_offset: u64) -> Self {
        Self {
            path: path.into(),
            partition_offset,
            buffer_size: 64 * 1024,
        }
    }

    /// The live volume behind a drive letter. Needs administrative rights.
    pub fn device(letter: char) -> Self {
        Self::new(format!(r"\\.\{}:", letter), 0)
    }
}

impl VolumeProvider for ImageVolume {
    type Source = PartitionSlice<BufReader<File>>;

    fn open(&self) -> Result<Self::Source> {
        debug!(
            "Opening volume '{}' at offset 0x{:X}",
            self.path.display(),
            self.partition_offset
        );
        let file = File::open(&self.path)?;
        let reader = BufReader::with_capacity(self.buffer_size, file);
        Ok(PartitionSlice::new(reader, self.partition_offset)?)
    }
}

/// A volume held entirely in memory; every handle shares the bytes.
#[derive(Debug, Clone)]
pub struct MemoryVolume {
    bytes: Arc<[u8]>,
}

impl MemoryVolume {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl VolumeProvider for MemoryVolume {
    type Source = Cursor<Arc<[u8]>>;

    fn open(&self) -> Result<Self::Source> {
        Ok(Cursor::new(Arc::clone(&self.bytes)))
    }
}
