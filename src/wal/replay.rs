use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use super::header::HEADER_SIZE;
use crate::error::{Error, Result};
use crate::Hasher;

pub type Entry = (Vec<u8>, Vec<u8>);

/// Sequential reader over the entries of a log file. Feeds every complete
/// entry into a rolling checksum and remembers where the last one ended, so a
/// torn tail can be cut off.
pub struct Replay {
    reader: BufReader<File>,
    hasher: Hasher,
    offset: u64,
    len: u64,
    count: u64,
}

impl Replay {
    pub fn new(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(Replay {
            reader: BufReader::new(file),
            hasher: Hasher::new(),
            offset: HEADER_SIZE as u64,
            len,
            count: 0,
        })
    }

    /// End offset of the last complete entry.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn checksum(&self) -> u64 {
        self.hasher.checksum()
    }

    pub fn into_hasher(self) -> Hasher {
        self.hasher
    }

    /// Reads the next entry. `Ok(None)` at a clean end of file; an entry cut
    /// short is [`Error::CorruptedLog`] and leaves the offset untouched.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.offset >= self.len {
            return Ok(None);
        }
        let mut pos = self.offset;
        let key = self.read_field(&mut pos, "key")?;
        let value = self.read_field(&mut pos, "value")?;

        self.hasher.write(&key);
        self.hasher.write(&value);
        self.offset = pos;
        self.count += 1;
        Ok(Some((key, value)))
    }

    fn read_field(&mut self, pos: &mut u64, field: &'static str) -> Result<Vec<u8>> {
        let len = self.reader.read_u32::<BigEndian>().map_err(|e| torn(e, field))? as u64;
        *pos += 4;
        if len > self.len.saturating_sub(*pos) {
            return Err(Error::CorruptedLog(format!(
                "{field} of {len} bytes at offset {pos} runs past the end of the log"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).map_err(|e| torn(e, field))?;
        *pos += len;
        Ok(buf)
    }
}

fn torn(err: io::Error, field: &str) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::CorruptedLog(format!("unexpected end of log while reading {field}"))
        }
        _ => Error::Io(err),
    }
}
