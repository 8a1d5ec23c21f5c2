//! Data File Iterator
//!
//! Sequential scan over the records of a data file, used when a data file
//! has no usable hint file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{CaskError, Result};
use crate::keydir::KeyDirEntry;

use super::record::RecordHeader;
use super::{FileId, HintEntry, LogRecord, HEADER_SIZE};

/// A record found by a scan, with the offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRecord {
    pub position: u64,
    pub len: u64,
    pub record: LogRecord,
}

impl ScannedRecord {
    /// KeyDir entry for this record in data file `file_id`
    pub fn to_entry(&self, file_id: FileId) -> HintEntry {
        HintEntry {
            key: self.record.key.clone(),
            entry: KeyDirEntry {
                file_id,
                value_size: self.record.value_len() as u32,
                value_position: self.position + self.record.value_offset(),
                timestamp: self.record.timestamp,
                tombstone: self.record.is_tombstone(),
            },
        }
    }
}

/// Iterator over the records of a data file in write order
///
/// A truncated or corrupt record yields one `Err(CorruptRecord)` and ends
/// the iteration; everything before it is still returned.
pub struct DataFileIterator<R: Read> {
    reader: BufReader<R>,
    /// Offset just past the last valid record
    position: u64,
    /// Total bytes available, when known
    limit: Option<u64>,
    buf: Vec<u8>,
    done: bool,
}

impl DataFileIterator<File> {
    /// Open the data file at `path` for scanning
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        let limit = file.metadata()?.len();
        let mut iter = Self::new(file, chunk_size);
        iter.limit = Some(limit);
        Ok(iter)
    }
}

impl<R: Read> DataFileIterator<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(chunk_size.max(HEADER_SIZE), reader),
            position: 0,
            limit: None,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Offset just past the last valid record returned so far
    pub fn position(&self) -> u64 {
        self.position
    }

    fn read_record(&mut self) -> Result<Option<ScannedRecord>> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.reader, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(CaskError::CorruptRecord(format!(
                "truncated header at offset {}",
                self.position
            )));
        }

        let parsed = RecordHeader::parse(&header)?;
        let record_len = parsed.record_len();

        if let Some(limit) = self.limit {
            if self.position + record_len as u64 > limit {
                return Err(CaskError::CorruptRecord(format!(
                    "record at offset {} runs past end of file",
                    self.position
                )));
            }
        }

        self.buf.clear();
        self.buf.extend_from_slice(&header);
        self.buf.resize(record_len, 0);
        if let Err(e) = self.reader.read_exact(&mut self.buf[HEADER_SIZE..]) {
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(CaskError::CorruptRecord(format!(
                    "truncated record at offset {}",
                    self.position
                )));
            }
            return Err(e.into());
        }

        let (record, len) = LogRecord::decode(&self.buf)?;
        let scanned = ScannedRecord {
            position: self.position,
            len: len as u64,
            record,
        };
        self.position += len as u64;
        Ok(Some(scanned))
    }
}

impl<R: Read> Iterator for DataFileIterator<R> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(scanned)) => Some(Ok(scanned)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
