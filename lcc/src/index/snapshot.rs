//! Versioned binary encoding of index snapshots.
//!
//! # Format
//!
//! The envelope (magic, version, created_at and checksum) is fixed-width big-endian. Lengths in
//! the body are varints.
//!
//! ```txt
//! +--------+---------+------------+-------------+-------+---------+-------+
//! | "LCCI" | version | created_at | record_type | count | entries | crc32 |
//! +--------+---------+------------+-------------+-------+---------+-------+
//!    4 B      u16        u64 ms     len + bytes  varint    ...       u32
//!
//! entry: | hash (len + bytes) | content_id (len + bytes) |
//! ```
//!
//! The checksum covers every preceding byte. The magic and version are checked before anything
//! else so that snapshots written by an incompatible version are reported as such (rather than as
//! corrupt).

use super::Index;
use crate::record::{self, HashRecord};
use bytes::{Buf, BufMut};
use commonware_codec::{
    EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Identifies an index snapshot.
pub const MAGIC: [u8; 4] = *b"LCCI";

/// The version of the snapshot format written by this crate.
pub const VERSION: u16 = 1;

/// Maximum length (in bytes) of the record type, a hash, or a content id.
pub const MAX_FIELD_LEN: usize = 64 * 1024;

/// Limit on the length of a length-prefixed value.
type LenCfg = <usize as Read>::Cfg;

/// Size of the magic and version.
const PREFIX_SIZE: usize = MAGIC.len() + 2;

/// Size of the trailing checksum.
const CHECKSUM_SIZE: usize = 4;

/// Errors that can occur when decoding a snapshot.
#[derive(Debug, Error)]
pub enum Error {
    #[error("snapshot too short: {0} bytes")]
    TooShort(usize),
    #[error("magic mismatch")]
    MagicMismatch,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("checksum mismatch: stored={stored} computed={computed}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// An index along with the metadata it was published with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// The type of records indexed.
    pub record_type: String,

    /// When the snapshot was created (millisecond precision).
    pub created_at: SystemTime,

    /// The index.
    pub index: Index,
}

/// Milliseconds since the Unix epoch (saturating at zero for earlier times).
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn write_field(value: &str, buf: &mut impl BufMut) {
    value.len().write(buf);
    buf.put_slice(value.as_bytes());
}

fn field_size(value: &str) -> usize {
    value.len().encode_size() + value.len()
}

fn read_field(buf: &mut impl Buf, range: &LenCfg) -> Result<String, CodecError> {
    let bytes = Vec::<u8>::read_cfg(buf, &(range.clone(), ()))?;
    String::from_utf8(bytes).map_err(|_| CodecError::Invalid("Snapshot", "field is not utf-8"))
}

impl Write for HashRecord {
    fn write(&self, buf: &mut impl BufMut) {
        write_field(self.hash(), buf);
        write_field(self.content_id(), buf);
    }
}

impl EncodeSize for HashRecord {
    fn encode_size(&self) -> usize {
        field_size(self.hash()) + field_size(self.content_id())
    }
}

impl Read for HashRecord {
    /// Limit on the length of each field.
    type Cfg = LenCfg;

    fn read_cfg(buf: &mut impl Buf, range: &Self::Cfg) -> Result<Self, CodecError> {
        let hash = read_field(buf, range)?;
        let content_id = read_field(buf, range)?;
        Self::new(hash, content_id).map_err(|err| {
            let reason = match err {
                record::Error::EmptyHash => "empty hash",
                record::Error::EmptyContentId => "empty content id",
                record::Error::LineBreak(_) => "field contains a line break",
                _ => "invalid record",
            };
            CodecError::Invalid("HashRecord", reason)
        })
    }
}

impl Snapshot {
    /// Encode the snapshot using the current format [VERSION].
    pub fn encode(&self) -> Vec<u8> {
        let body_size = u64::SIZE
            + field_size(&self.record_type)
            + self.index.len().encode_size()
            + self
                .index
                .records()
                .map(EncodeSize::encode_size)
                .sum::<usize>();
        let mut buf = Vec::with_capacity(PREFIX_SIZE + body_size + CHECKSUM_SIZE);
        buf.put_slice(&MAGIC);
        VERSION.write(&mut buf);
        epoch_millis(self.created_at).write(&mut buf);
        write_field(&self.record_type, &mut buf);

        // Same layout as an encoded `Vec<HashRecord>`
        self.index.len().write(&mut buf);
        for record in self.index.records() {
            record.write(&mut buf);
        }
        let checksum = crc32fast::hash(&buf);
        checksum.write(&mut buf);
        buf
    }

    /// Decode a snapshot, rejecting unknown versions and any corruption.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < PREFIX_SIZE {
            return Err(Error::TooShort(data.len()));
        }
        let mut prefix = &data[..PREFIX_SIZE];
        if prefix[..MAGIC.len()] != MAGIC {
            return Err(Error::MagicMismatch);
        }
        prefix.advance(MAGIC.len());
        let version = u16::read(&mut prefix)?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        if data.len() < PREFIX_SIZE + CHECKSUM_SIZE {
            return Err(Error::TooShort(data.len()));
        }

        // Verify integrity
        let (body, mut stored) = data.split_at(data.len() - CHECKSUM_SIZE);
        let stored = u32::read(&mut stored)?;
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(Error::ChecksumMismatch { stored, computed });
        }

        let mut buf = &body[PREFIX_SIZE..];
        let fields = RangeCfg::from(..=MAX_FIELD_LEN);
        let created_at = UNIX_EPOCH + Duration::from_millis(u64::read(&mut buf)?);
        let record_type = read_field(&mut buf, &fields)?;

        // Each entry requires at least two length prefixes
        let entries = RangeCfg::from(..=buf.remaining() / 2);
        let records = Vec::<HashRecord>::read_cfg(&mut buf, &(entries, fields))?;
        if buf.has_remaining() {
            return Err(CodecError::ExtraData(buf.remaining()).into());
        }

        Ok(Self {
            record_type,
            created_at,
            index: Index::build(records),
        })
    }
}
