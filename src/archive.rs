//! Boundary to whatever provides archive entries. Directory parsing
//! lives with the provider; this side only needs a seekable stream per
//! entry and, for encrypted entries, a cipher to layer on top of it.

use crate::crypt::{Blowfish, BlowfishStream};
use bytes::Bytes;
use std::{
    fmt::Debug,
    io::{Read, Seek},
    path::PathBuf,
};

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub file_name: String,
    pub full_path: PathBuf,
    pub file_offset: u64,
    pub file_size: u64,
}

/// An open entry: positioned at logical offset zero, `file_size` bytes
/// long.
pub trait EntryStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> EntryStream for T {}

// Workaround until it is possible to return impl Trait in traits
pub trait ArchiveProvider: Sync + Send + Debug {
    fn open_entry(&self, entry: &FileEntry)
        -> anyhow::Result<Box<dyn EntryStream>>;
}

pub fn read_entry(
    provider: &dyn ArchiveProvider,
    entry: &FileEntry,
) -> anyhow::Result<Bytes> {
    let mut stream = provider.open_entry(entry)?;
    let mut buf = Vec::with_capacity(entry.file_size as usize);
    stream.read_to_end(&mut buf)?;
    Ok(buf.into())
}

/// Reads a whole encrypted entry, decrypting through a
/// [`BlowfishStream`] layered over the provider's stream.
pub fn read_entry_decrypted(
    provider: &dyn ArchiveProvider,
    entry: &FileEntry,
    cipher: Blowfish,
) -> anyhow::Result<Bytes> {
    let stream = provider.open_entry(entry)?;
    let mut stream = BlowfishStream::new(cipher, stream, entry.file_size)?;
    let mut buf = Vec::with_capacity(entry.file_size as usize);
    stream.read_to_end(&mut buf)?;
    Ok(buf.into())
}
