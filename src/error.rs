use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Cs2Error {
    #[error("Unrecognized format: {0:?} {1:X?}")]
    UnrecognizedFormat(PathBuf, Vec<u8>),
    #[error("{name}: expected \"stdinfo\" tag at offset 0x{offset:X}")]
    MissingStdInfo { name: String, offset: usize },
    #[error("{name}: frame chain does not advance at offset 0x{offset:X}")]
    StalledChain { name: String, offset: usize },
    #[error("{0}: no image tags found")]
    NoImageTags(String),
    #[error("Unsupported image: {0}")]
    Unsupported(String),
    #[error("Image data may be corrupt: {0}")]
    CorruptImage(String),
    #[error("Buffer length {0} is not a multiple of the cipher block size")]
    BlockAlignment(usize),
    #[error("{0}")]
    Custom(String),
}
