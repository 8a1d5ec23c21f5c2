//! Hint files
//!
//! A hint file is a value-free projection of its data file: one record per
//! log record, carrying the record's offset so recovery can rebuild the
//! KeyDir without reading values.
//!
//! Parsing is incremental: [`HintParser`] accepts arbitrarily sized chunks
//! and produces identical output whether fed one byte or the whole file.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};
use crate::keydir::KeyDirEntry;

use super::record::RecordHeader;
use super::{FileId, LogRecord, CRC_SIZE, HEADER_SIZE, HINT_HEADER_SIZE, MAX_TOTAL_SIZE};

/// A single record in a hint file
#[derive(Debug, Clone, PartialEq)]
pub struct HintRecord {
    pub timestamp: f64,
    pub key: Vec<u8>,
    /// TotalSize of the data record, flag stripped
    pub total_size: u32,
    pub tombstone: bool,
    /// Offset of the data record start in its data file
    pub position: u64,
}

impl HintRecord {
    /// Hint for `record` written at `position` of its data file
    pub fn for_record(record: &LogRecord, position: u64) -> Self {
        Self {
            timestamp: record.timestamp,
            key: record.key.clone(),
            total_size: record.total_size() as u32,
            tombstone: record.is_tombstone(),
            position,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HINT_HEADER_SIZE + self.key.len() + CRC_SIZE
    }

    /// Encode to the on-disk layout
    pub fn encode(&self) -> Result<Bytes> {
        if self.key.len() > u16::MAX as usize || self.total_size > MAX_TOTAL_SIZE {
            return Err(CaskError::RecordTooLarge {
                key_len: self.key.len(),
                total_len: self.total_size as u64,
            });
        }

        let header = RecordHeader {
            timestamp: self.timestamp,
            key_size: self.key.len(),
            total_size: self.total_size as usize,
            tombstone: self.tombstone,
        };

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_f64(header.timestamp);
        buf.put_u16(header.key_size as u16);
        buf.put_u32(header.raw_total_size());
        buf.put_f64(self.position as f64);
        buf.put_slice(&self.key);

        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);

        Ok(buf.freeze())
    }
}

/// A KeyDir entry reconstructed from a hint or data file
#[derive(Debug, Clone, PartialEq)]
pub struct HintEntry {
    pub key: Vec<u8>,
    pub entry: KeyDirEntry,
}

/// Where the parser is within the current hint record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Waiting for a full fixed-size header
    FindingHeader,
    /// Header parsed, waiting for the key bytes
    HeaderFound,
    /// Key parsed, waiting for the trailing CRC
    KeyFound,
}

#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    record: RecordHeader,
    position: u64,
}

/// Streaming hint file parser
pub struct HintParser {
    file_id: FileId,
    state: ParseState,
    buffer: BytesMut,
    header: Option<PendingHeader>,
    pending: Option<HintEntry>,
    hasher: crc32fast::Hasher,
    entries_parsed: u64,
}

impl HintParser {
    /// Parser for the hint file paired with data file `file_id`
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            state: ParseState::FindingHeader,
            buffer: BytesMut::new(),
            header: None,
            pending: None,
            hasher: crc32fast::Hasher::new(),
            entries_parsed: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Bytes received but not yet consumed by a transition
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn entries_parsed(&self) -> u64 {
        self.entries_parsed
    }

    /// Feed the next chunk, appending every completed entry to `out`
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<HintEntry>) -> Result<()> {
        self.buffer.extend_from_slice(chunk);

        loop {
            match self.state {
                ParseState::FindingHeader => {
                    if self.buffer.len() < HINT_HEADER_SIZE {
                        return Ok(());
                    }
                    let header = self.buffer.split_to(HINT_HEADER_SIZE);
                    self.hasher = crc32fast::Hasher::new();
                    self.hasher.update(&header);

                    let record = RecordHeader::parse(&header)
                        .map_err(|e| self.corrupt(format!("bad header: {}", e)))?;
                    let position = (&header[HEADER_SIZE..]).get_f64();
                    if !(position.is_finite() && position >= 0.0 && position.fract() == 0.0) {
                        return Err(self.corrupt(format!("bad position {}", position)));
                    }

                    self.header = Some(PendingHeader {
                        record,
                        position: position as u64,
                    });
                    self.state = ParseState::HeaderFound;
                }
                ParseState::HeaderFound => {
                    let header = match self.header {
                        Some(header) => header,
                        None => return Err(self.corrupt("missing header".to_string())),
                    };
                    if self.buffer.len() < header.record.key_size {
                        return Ok(());
                    }
                    let key = self.buffer.split_to(header.record.key_size);
                    self.hasher.update(&key);

                    let entry = KeyDirEntry {
                        file_id: self.file_id,
                        value_size: header.record.value_size() as u32,
                        value_position: header.position
                            + (HEADER_SIZE + header.record.key_size) as u64,
                        timestamp: header.record.timestamp,
                        tombstone: header.record.tombstone,
                    };
                    self.pending = Some(HintEntry {
                        key: key.to_vec(),
                        entry,
                    });
                    self.header = None;
                    self.state = ParseState::KeyFound;
                }
                ParseState::KeyFound => {
                    if self.buffer.len() < CRC_SIZE {
                        return Ok(());
                    }
                    let stored_crc = self.buffer.split_to(CRC_SIZE).get_u32();
                    let hasher = std::mem::replace(&mut self.hasher, crc32fast::Hasher::new());
                    let computed_crc = hasher.finalize();
                    if stored_crc != computed_crc {
                        return Err(self.corrupt(format!(
                            "CRC mismatch after {} entries",
                            self.entries_parsed
                        )));
                    }

                    if let Some(entry) = self.pending.take() {
                        out.push(entry);
                        self.entries_parsed += 1;
                    }
                    self.state = ParseState::FindingHeader;
                }
            }
        }
    }

    /// Signal end of input; leftover bytes mean the file was truncated
    pub fn finish(self) -> Result<()> {
        if self.state != ParseState::FindingHeader || !self.buffer.is_empty() {
            return Err(CaskError::CorruptHintFile {
                file_id: self.file_id,
                reason: format!(
                    "truncated in state {:?} with {} buffered bytes",
                    self.state,
                    self.buffer.len()
                ),
            });
        }
        Ok(())
    }

    /// Parse a complete hint stream, reading `chunk_size` bytes at a time
    pub fn parse_reader<R: Read>(
        file_id: FileId,
        mut reader: R,
        chunk_size: usize,
    ) -> Result<Vec<HintEntry>> {
        let mut parser = HintParser::new(file_id);
        let mut entries = Vec::new();
        let mut chunk = vec![0u8; chunk_size.max(1)];

        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            parser.feed(&chunk[..n], &mut entries)?;
        }

        parser.finish()?;
        Ok(entries)
    }

    /// Parse the hint file at `path`
    pub fn parse_file(file_id: FileId, path: &Path, chunk_size: usize) -> Result<Vec<HintEntry>> {
        let file = File::open(path)?;
        Self::parse_reader(file_id, file, chunk_size)
    }

    fn corrupt(&self, reason: String) -> CaskError {
        CaskError::CorruptHintFile {
            file_id: self.file_id,
            reason,
        }
    }
}
