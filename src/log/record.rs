//! Log Record codec
//!
//! Binary encoding of a single data file record.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

use super::{now_timestamp, CRC_SIZE, HEADER_SIZE, MAX_TOTAL_SIZE, TOMBSTONE_FLAG};

/// Fixed-size prefix shared by data and hint records
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RecordHeader {
    pub timestamp: f64,
    pub key_size: usize,
    /// Header + key + value, tombstone flag stripped
    pub total_size: usize,
    pub tombstone: bool,
}

impl RecordHeader {
    /// Parse the first `HEADER_SIZE` bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CaskError::CorruptRecord(format!(
                "truncated header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = &buf[..HEADER_SIZE];
        let timestamp = cursor.get_f64();
        let key_size = cursor.get_u16() as usize;
        let raw_total = cursor.get_u32();

        let tombstone = raw_total & TOMBSTONE_FLAG != 0;
        let total_size = (raw_total & !TOMBSTONE_FLAG) as usize;

        if total_size < HEADER_SIZE + key_size {
            return Err(CaskError::CorruptRecord(format!(
                "total size {} smaller than header and {} byte key",
                total_size, key_size
            )));
        }
        if tombstone && total_size != HEADER_SIZE + key_size {
            return Err(CaskError::CorruptRecord(
                "tombstone record carries a value".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            key_size,
            total_size,
            tombstone,
        })
    }

    pub fn value_size(&self) -> usize {
        self.total_size - HEADER_SIZE - self.key_size
    }

    /// Full on-disk length including the trailing CRC
    pub fn record_len(&self) -> usize {
        self.total_size + CRC_SIZE
    }

    /// Raw TotalSize field, flag included
    pub fn raw_total_size(&self) -> u32 {
        let flag = if self.tombstone { TOMBSTONE_FLAG } else { 0 };
        self.total_size as u32 | flag
    }
}

/// A single record in a data file
///
/// `value == None` marks a tombstone: the key was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Milliseconds since the UNIX epoch when the record was created
    pub timestamp: f64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl LogRecord {
    /// A live key/value record stamped with the current time
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: now_timestamp(),
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A removal marker for `key` stamped with the current time
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: now_timestamp(),
            key: key.into(),
            value: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, Vec::len)
    }

    /// Header + key + value (the TotalSize field without the flag)
    pub fn total_size(&self) -> u64 {
        (HEADER_SIZE + self.key.len() + self.value_len()) as u64
    }

    /// Bytes this record occupies on disk
    pub fn encoded_len(&self) -> u64 {
        self.total_size() + CRC_SIZE as u64
    }

    /// Offset of the value relative to the record start
    pub fn value_offset(&self) -> u64 {
        (HEADER_SIZE + self.key.len()) as u64
    }

    /// Check the record fits the size fields without encoding it
    pub fn validate(&self) -> Result<()> {
        let total_size = self.total_size();
        if self.key.len() > u16::MAX as usize || total_size > MAX_TOTAL_SIZE as u64 {
            return Err(CaskError::RecordTooLarge {
                key_len: self.key.len(),
                total_len: total_size,
            });
        }
        Ok(())
    }

    /// Encode to the on-disk layout
    ///
    /// Fails with `RecordTooLarge` if the key does not fit the 16-bit size
    /// field or the record does not fit the 31 usable bits of TotalSize.
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;

        let total_size = self.total_size();
        let flag = if self.is_tombstone() { TOMBSTONE_FLAG } else { 0 };

        let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
        buf.put_f64(self.timestamp);
        buf.put_u16(self.key.len() as u16);
        buf.put_u32(total_size as u32 | flag);
        buf.put_slice(&self.key);
        if let Some(value) = &self.value {
            buf.put_slice(value);
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);

        Ok(buf.freeze())
    }

    /// Decode one record from the start of `buf`
    ///
    /// Returns the record and the number of bytes it occupied. Fails with
    /// `CorruptRecord` when the declared sizes run past `buf` or the CRC
    /// does not match.
    pub fn decode(buf: &[u8]) -> Result<(LogRecord, usize)> {
        let header = RecordHeader::parse(buf)?;
        let record_len = header.record_len();

        if buf.len() < record_len {
            return Err(CaskError::CorruptRecord(format!(
                "truncated record: {} of {} bytes",
                buf.len(),
                record_len
            )));
        }

        let stored_crc = (&buf[header.total_size..record_len]).get_u32();
        let computed_crc = crc32fast::hash(&buf[..header.total_size]);
        if stored_crc != computed_crc {
            return Err(CaskError::CorruptRecord(format!(
                "CRC mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, computed_crc
            )));
        }

        let key_end = HEADER_SIZE + header.key_size;
        let key = buf[HEADER_SIZE..key_end].to_vec();
        let value = if header.tombstone {
            None
        } else {
            Some(buf[key_end..header.total_size].to_vec())
        };

        Ok((
            LogRecord {
                timestamp: header.timestamp,
                key,
                value,
            },
            record_len,
        ))
    }
}
