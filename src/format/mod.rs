//! Decoders for the small subset of the WMO and M2 file formats that the streamer needs in order
//! to discover what to load next: group counts, doodad sets and placements, doodad references of
//! groups and the animation hints of M2 models. Everything else (geometry, materials, ...) is left
//! to the importers of the renderer.
//!
//! These are pure functions from a buffer to a description and run on the streaming workers.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::io::common::loader::LoaderError;

pub mod m2;
pub mod wmo;


#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("The file's magic value does not match the expectation {magic:#010x}")]
    InvalidMagicValue { magic: u32 },

    #[error("The file is violating the expected format, because: {reason}")]
    FormatError { reason: &'static str },

    #[error("Missing mandatory {0} chunk")]
    MissingChunk(&'static str),

    #[error("Invalid job arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    LoaderError(#[from] LoaderError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UTF8ConversationError(#[from] std::string::FromUtf8Error),
}

/// Builds the magic as it is read from the file (the FourCCs are stored reversed).
pub(crate) const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

#[derive(Debug)]
pub(crate) struct IffChunk<'a> {
    pub magic: u32,
    pub data: &'a [u8],
}

impl<'a> IffChunk<'a> {
    pub fn reader(&self) -> Cursor<&'a [u8]> {
        Cursor::new(self.data)
    }
}

/// Splits a buffer into its IFF chunks. Trailing garbage that is too short to be a chunk header is
/// a format error, as is a chunk that claims more bytes than there are left.
pub(crate) fn read_chunks(data: &[u8]) -> Result<Vec<IffChunk<'_>>, DecodeError> {
    let mut chunks = Vec::new();
    let mut rdr = Cursor::new(data);

    while (rdr.position() as usize) < data.len() {
        if data.len() - (rdr.position() as usize) < 8 {
            return Err(DecodeError::FormatError {
                reason: "Truncated chunk header",
            });
        }

        let magic = rdr.read_u32::<LittleEndian>()?;
        let size = rdr.read_u32::<LittleEndian>()? as usize;
        let start = rdr.position() as usize;
        if data.len() - start < size {
            return Err(DecodeError::FormatError {
                reason: "Chunk exceeds the file size",
            });
        }

        chunks.push(IffChunk {
            magic,
            data: &data[start..start + size],
        });
        rdr.seek(SeekFrom::Current(size as i64))?;
    }

    Ok(chunks)
}

pub(crate) fn find_chunk<'c, 'a>(chunks: &'c [IffChunk<'a>], magic: u32) -> Option<&'c IffChunk<'a>> {
    chunks.iter().find(|chunk| chunk.magic == magic)
}

pub(crate) fn get_mandatory_chunk<'c, 'a>(
    chunks: &'c [IffChunk<'a>],
    magic: u32,
    name: &'static str,
) -> Result<&'c IffChunk<'a>, DecodeError> {
    find_chunk(chunks, magic).ok_or(DecodeError::MissingChunk(name))
}

/// Reads fixed size records until the chunk is exhausted.
pub(crate) fn read_records<T, F>(chunk: &IffChunk, record_size: usize, mut parse: F) -> Result<Vec<T>, DecodeError>
where
    F: FnMut(&mut Cursor<&[u8]>) -> Result<T, DecodeError>,
{
    if chunk.data.len() % record_size != 0 {
        return Err(DecodeError::FormatError {
            reason: "Chunk size is not a multiple of its record size",
        });
    }

    let mut rdr = chunk.reader();
    (0..chunk.data.len() / record_size)
        .map(|_| parse(&mut rdr))
        .collect()
}

/// A list of NUL terminated strings, addressed by their byte offset into the chunk.
pub(crate) fn read_string_table(data: &[u8]) -> Result<Vec<(u32, String)>, DecodeError> {
    let mut strings = Vec::new();
    let mut offset = 0usize;
    for raw in data.split(|&byte| byte == 0) {
        if !raw.is_empty() {
            strings.push((offset as u32, String::from_utf8(raw.to_vec())?));
        }
        offset += raw.len() + 1;
    }
    Ok(strings)
}

pub(crate) fn read_fixed_string<R: Read>(rdr: &mut R, length: usize) -> Result<String, DecodeError> {
    let mut buf = vec![0u8; length];
    rdr.read_exact(&mut buf)?;
    // anything past the first NUL is padding or stale memory of the exporter
    buf.truncate(buf.iter().position(|&byte| byte == 0).unwrap_or(length));
    Ok(String::from_utf8(buf)?)
}
