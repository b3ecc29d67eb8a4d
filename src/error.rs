//! Error type shared by every stage of the collection pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("invalid boot record: {0}")]
    InvalidBootRecord(String),

    #[error("unsupported MFT record size encoding 0x{0:02X}")]
    UnsupportedMftRecordSize(u8),

    #[error("not an MFT record (offset 0x{0:X})")]
    NotAnMftRecord(u64),

    #[error("update sequence mismatch in record {0}")]
    FixupMismatch(u64),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("invalid data run: {0}")]
    InvalidDataRun(String),

    #[error("unexpected end of extent stream")]
    UnexpectedEndOfStream,

    #[error("$MFT record 0 has no usable $DATA attribute")]
    MissingMftData,

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output sink failed for '{0}': {1}")]
    Sink(String, String),
}

pub type Result<T> = std::result::Result<T, CollectError>;

impl CollectError {
    /// Errors that only invalidate a single record; the scan keeps going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CollectError::NotAnMftRecord(_)
                | CollectError::FixupMismatch(_)
                | CollectError::InvalidAttribute(_)
                | CollectError::InvalidDataRun(_)
        )
    }
}

impl From<CollectError> for std::io::Error {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Io(e) => e,
            CollectError::UnexpectedEndOfStream => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
