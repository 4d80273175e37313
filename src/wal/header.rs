use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 22;
pub const MAGIC: u32 = 0x52_4E_4B; // ASCII "RNK"
pub const VERSION: u16 = 1;

/// Fixed header at offset 0 of the log file. `entry_count` and `checksum`
/// describe the prefix of the log that was durable at the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub entry_count: u64,
    pub checksum: u64,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            entry_count: 0,
            checksum: 0,
        }
    }
}

impl Header {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        HeaderEncoder::new(&mut buf).encode(self)?;
        Ok(buf)
    }

    /// Decodes and validates a header; a foreign magic number or a version
    /// from the future is [`Error::InvalidHeader`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader);
        }
        let header = HeaderDecoder::new(bytes).decode()?;
        if header.magic != MAGIC || header.version == 0 || header.version > VERSION {
            return Err(Error::InvalidHeader);
        }
        Ok(header)
    }
}

pub struct HeaderDecoder<R: Read> {
    reader: R,
}

impl<R: Read> HeaderDecoder<R> {
    pub fn new(reader: R) -> Self {
        HeaderDecoder { reader }
    }

    pub fn decode(&mut self) -> Result<Header> {
        let magic = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("magic", e))?;
        let version = self
            .reader
            .read_u16::<BigEndian>()
            .map_err(|e| Error::Decode("version", e))?;
        let entry_count = self
            .reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("entry_count", e))?;
        let checksum = self
            .reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("checksum", e))?;

        Ok(Header {
            magic,
            version,
            entry_count,
            checksum,
        })
    }
}

pub struct HeaderEncoder<W: Write> {
    writer: W,
}

impl<W: Write> HeaderEncoder<W> {
    pub fn new(writer: W) -> Self {
        HeaderEncoder { writer }
    }

    pub fn encode(&mut self, header: &Header) -> Result<()> {
        self.writer
            .write_u32::<BigEndian>(header.magic)
            .map_err(|e| Error::Encode("magic", e))?;
        self.writer
            .write_u16::<BigEndian>(header.version)
            .map_err(|e| Error::Encode("version", e))?;
        self.writer
            .write_u64::<BigEndian>(header.entry_count)
            .map_err(|e| Error::Encode("entry_count", e))?;
        self.writer
            .write_u64::<BigEndian>(header.checksum)
            .map_err(|e| Error::Encode("checksum", e))?;
        Ok(())
    }
}
