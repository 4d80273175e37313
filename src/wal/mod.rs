//! Append-only log of `(key, value)` puts.
//!
//! ```text
//! +--------------------+----------------------------------------------+
//! | header (22 bytes)  | u32 key len | key | u32 value len | value | .. |
//! +--------------------+----------------------------------------------+
//! ```
//!
//! The header is rewritten on every sync with the entry count and rolling
//! crc64 of everything synced so far. On open, entries up to that count must
//! reproduce the checksum; anything after it was never acknowledged as durable
//! and is dropped if it ends in a partial entry.
//!
//! A failed append or sync rolls the file back to the last successful sync
//! and leaves the log refusing writes with [`Error::LogFailed`].

pub mod header;
pub mod replay;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::Hasher;

use header::{Header, HEADER_SIZE};
pub use replay::{Entry, Replay};

/// Append target for log entries.
pub(crate) trait LogFile: Write + Send + fmt::Debug {
    fn sync_data(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }
}

#[derive(Debug)]
pub struct Wal {
    /// Read-write handle for header rewrites and truncation.
    file: File,
    /// Append handle for entries. `None` once a write has failed.
    writer: Option<BufWriter<Box<dyn LogFile>>>,
    header: Header,
    hasher: Hasher,
    path: PathBuf,
    /// File length including every appended entry.
    written_len: u64,
    /// File length as of the last successful sync.
    durable_len: u64,
}

/// What [`Wal::open`] found on disk.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Entries handed to the replay callback.
    pub replayed: u64,
    /// Bytes cut off a torn tail.
    pub truncated: u64,
}

impl Wal {
    /// Opens or creates the log at `path`, feeding every recovered entry to
    /// `apply` in log order.
    pub fn open(
        path: impl AsRef<Path>,
        buffer_size: usize,
        apply: impl FnMut(Vec<u8>, Vec<u8>),
    ) -> Result<(Self, Recovery)> {
        Self::open_with(path, buffer_size, apply, |path| {
            let file = OpenOptions::new().append(true).open(path)?;
            Ok(Box::new(file) as Box<dyn LogFile>)
        })
    }

    pub(crate) fn open_with(
        path: impl AsRef<Path>,
        buffer_size: usize,
        mut apply: impl FnMut(Vec<u8>, Vec<u8>),
        appender: impl FnOnce(&Path) -> io::Result<Box<dyn LogFile>>,
    ) -> Result<(Self, Recovery)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let header = if file.metadata()?.len() == 0 {
            let header = Header::default();
            file.write_all(&header.encode()?)?;
            file.sync_all()?;
            header
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            file.read_exact(&mut buf).map_err(|e| Error::Decode("header", e))?;
            Header::decode(&buf)?
        };

        let (hasher, recovery) = Self::recover(&path, &file, &header, &mut apply)?;
        let len = file.metadata()?.len();
        let writer = BufWriter::with_capacity(buffer_size, appender(&path)?);

        let wal = Wal {
            file,
            writer: Some(writer),
            header: Header {
                entry_count: recovery.replayed,
                ..header
            },
            hasher,
            path,
            written_len: len,
            durable_len: len,
        };
        Ok((wal, recovery))
    }

    fn recover(
        path: &Path,
        file: &File,
        header: &Header,
        apply: &mut impl FnMut(Vec<u8>, Vec<u8>),
    ) -> Result<(Hasher, Recovery)> {
        let mut replay = Replay::new(path)?;
        let mut recovery = Recovery::default();

        loop {
            if replay.count() == header.entry_count
                && header.entry_count > 0
                && replay.checksum() != header.checksum
            {
                return Err(Error::CorruptedLog(format!(
                    "checksum mismatch after {} entries: computed {:016x}, stored {:016x}",
                    header.entry_count,
                    replay.checksum(),
                    header.checksum
                )));
            }

            match replay.next_entry() {
                Ok(Some((key, value))) => apply(key, value),
                Ok(None) => break,
                Err(Error::CorruptedLog(reason)) if replay.count() >= header.entry_count => {
                    let len = file.metadata()?.len();
                    recovery.truncated = len - replay.offset();
                    tracing::warn!(
                        path = %path.display(),
                        offset = replay.offset(),
                        truncated = recovery.truncated,
                        %reason,
                        "Truncating torn log tail"
                    );
                    file.set_len(replay.offset())?;
                    file.sync_all()?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if replay.count() < header.entry_count {
            return Err(Error::CorruptedLog(format!(
                "log holds {} entries but {} were synced",
                replay.count(),
                header.entry_count
            )));
        }
        recovery.replayed = replay.count();
        Ok((replay.into_hasher(), recovery))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    /// True once a write has failed and the log refuses further writes.
    pub fn is_failed(&self) -> bool {
        self.writer.is_none()
    }

    /// Buffers one entry. Not durable until [`Wal::sync`].
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key_len = length(key, "key")?;
        let value_len = length(value, "value")?;
        let writer = self.writer.as_mut().ok_or(Error::LogFailed)?;

        if let Err(e) = write_entry(writer, key_len, key, value_len, value) {
            self.fail(&e);
            return Err(e.into());
        }

        self.hasher.write(key);
        self.hasher.write(value);
        self.header.entry_count += 1;
        self.written_len += 8 + u64::from(key_len) + u64::from(value_len);
        Ok(())
    }

    /// Flushes buffered entries, fsyncs them, then records the new count and
    /// checksum in the header and fsyncs again.
    pub fn sync(&mut self) -> Result<()> {
        if let Err(e) = self.commit() {
            if !matches!(e, Error::LogFailed) {
                self.fail(&e);
            }
            return Err(e);
        }
        self.durable_len = self.written_len;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::LogFailed)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;

        self.header.checksum = self.hasher.checksum();
        let bytes = self.header.encode()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Drops the append handle with whatever it still buffers and cuts the
    /// file back to the last successful sync.
    fn fail(&mut self, cause: &dyn fmt::Display) {
        if let Some(writer) = self.writer.take() {
            let (_, _discarded) = writer.into_parts();
        }
        tracing::error!(
            path = %self.path.display(),
            durable_len = self.durable_len,
            written_len = self.written_len,
            error = %cause,
            "Log write failed, rolling back to last sync"
        );
        if let Err(e) = self
            .file
            .set_len(self.durable_len)
            .and_then(|()| self.file.sync_all())
        {
            tracing::error!(path = %self.path.display(), error = %e, "Log rollback failed");
        }
    }
}

fn write_entry(
    writer: &mut impl Write,
    key_len: u32,
    key: &[u8],
    value_len: u32,
    value: &[u8],
) -> io::Result<()> {
    writer.write_all(&key_len.to_be_bytes())?;
    writer.write_all(key)?;
    writer.write_all(&value_len.to_be_bytes())?;
    writer.write_all(value)
}

fn length(field: &[u8], name: &'static str) -> Result<u32> {
    u32::try_from(field.len()).map_err(|_| {
        Error::Encode(
            name,
            io::Error::new(io::ErrorKind::InvalidInput, "longer than u32::MAX bytes"),
        )
    })
}
