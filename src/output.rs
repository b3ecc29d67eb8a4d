//! Where collected artefacts go.

use crossbeam_channel::Receiver;
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CollectError, Result};

/// Consumer of `(normalized path, byte stream)` pairs.
///
/// `Send` because the $MFT copy is written from its own thread while the
/// scan reads the same bytes.
pub trait ArtifactSink: Send {
    /// Drain `reader` into the artefact named `name`. Returns the byte count.
    fn write_artifact(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64>;
}

/// Replace every path separator and drive colon with `_` so a full path can
/// be used as a flat file name.
pub fn normalize_output_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '\\' | '/' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Loose files under one output directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactSink for DirectorySink {
    fn write_artifact(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
        let target = self.root.join(name);
        debug!("Writing artefact to {}", target.display());
        let sink_err = |e: io::Error| CollectError::Sink(name.to_string(), e.to_string());

        let file = File::create(&target).map_err(sink_err)?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(reader, &mut writer)?;
        writer.flush().map_err(sink_err)?;
        Ok(written)
    }
}

/// Reading end of the bounded pipe that carries the $MFT bytes to the
/// writer thread. The stream ends when every sender is dropped.
pub struct ChannelReader {
    receiver: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new(receiver: Receiver<Vec<u8>>) -> Self {
        Self {
            receiver,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.receiver.recv() {
                Ok(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
