//! Archive codec for the batch CSR.
//!
//! Binary layout, fixed field order: magic, payload length, then inside the
//! payload `min_id, max_id, max_head_id, min_tail_id, dedup`, the head
//! region, the tail region, and finally a crc32 footer over the payload.

use std::convert::TryInto;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{FragmaError, Result};
use crate::model::Value;
use crate::storage::csr::{BatchCsr, CsrEdge};

const CSR_MAGIC: u32 = 0x4652_4147; // "FRAG"

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_MAP: u8 = 0x06;

/// Byte-level archive adaptor: an opened sink/source the codec reads and
/// writes through.
pub trait ArchiveIo {
    /// Writes all of `bytes`.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    /// Fills `buf` completely or fails.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// File-backed archive.
pub struct FileArchive {
    file: File,
}

impl FileArchive {
    /// Opens a fresh archive for writing, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Opens an existing archive for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Flushes and closes the archive.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl ArchiveIo for FileArchive {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        Ok(())
    }
}

/// In-memory archive for tests and buffering.
#[derive(Clone, Debug, Default)]
pub struct MemArchive {
    buf: Vec<u8>,
    pos: usize,
}

impl MemArchive {
    /// Empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive positioned at the start of `buf`.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl ArchiveIo for MemArchive {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() > self.buf.len() {
            return Err(FragmaError::Corruption(
                "unexpected end of archive".into(),
            ));
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}

/// Serializes a batch CSR into `io`.
pub fn write_csr(csr: &BatchCsr, io: &mut impl ArchiveIo) -> Result<()> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&csr.min_id().to_le_bytes());
    payload.extend_from_slice(&csr.max_id().to_le_bytes());
    payload.extend_from_slice(&csr.max_head_id().to_le_bytes());
    payload.extend_from_slice(&csr.min_tail_id().to_le_bytes());
    payload.push(u8::from(csr.dedup()));
    write_region(&mut payload, csr, csr.head_range())?;
    payload.push(u8::from(csr.tail_enabled()));
    write_region(&mut payload, csr, csr.tail_range())?;

    let checksum = crc32fast::hash(&payload);
    io.write_bytes(&CSR_MAGIC.to_le_bytes())?;
    io.write_bytes(&(payload.len() as u64).to_le_bytes())?;
    io.write_bytes(&payload)?;
    io.write_bytes(&checksum.to_le_bytes())?;
    Ok(())
}

/// Reads a batch CSR back from `io`, validating magic and checksum.
pub fn read_csr(io: &mut impl ArchiveIo) -> Result<BatchCsr> {
    let mut magic = [0u8; 4];
    io.read_bytes(&mut magic)?;
    if u32::from_le_bytes(magic) != CSR_MAGIC {
        return Err(FragmaError::Corruption("bad archive magic".into()));
    }
    let mut len_bytes = [0u8; 8];
    io.read_bytes(&mut len_bytes)?;
    let payload_len = u64::from_le_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; payload_len];
    io.read_bytes(&mut payload)?;
    let mut checksum_bytes = [0u8; 4];
    io.read_bytes(&mut checksum_bytes)?;
    if crc32fast::hash(&payload) != u32::from_le_bytes(checksum_bytes) {
        return Err(FragmaError::Corruption("archive checksum mismatch".into()));
    }

    let mut cursor = Cursor::new(&payload);
    let min_id = cursor.read_u64()?;
    let max_id = cursor.read_u64()?;
    let max_head_id = cursor.read_u64()?;
    let min_tail_id = cursor.read_u64()?;
    if !(min_id <= max_head_id && max_head_id <= min_tail_id && min_tail_id <= max_id) {
        return Err(FragmaError::Corruption("archive id ranges inverted".into()));
    }
    let dedup = cursor.read_bool()?;
    let mut head_slots = read_region(&mut cursor, max_head_id - min_id)?;
    let tail_enabled = cursor.read_bool()?;
    if !tail_enabled && min_tail_id != max_id {
        return Err(FragmaError::Corruption(
            "archive tail region populated but disabled".into(),
        ));
    }
    let tail_slots = read_region(&mut cursor, max_id - min_tail_id)?;
    cursor.ensure_consumed()?;

    let mut csr = BatchCsr::with_range(min_id, max_id, dedup, tail_enabled);
    csr.add_vertices(max_head_id - min_id, max_id - min_tail_id);
    for (offset, entries) in head_slots.drain(..).enumerate() {
        if !entries.is_empty() {
            csr.restore_slot(min_id + offset as u64, entries);
        }
    }
    for (offset, entries) in tail_slots.into_iter().enumerate() {
        if !entries.is_empty() {
            csr.restore_slot(max_id - 1 - offset as u64, entries);
        }
    }
    Ok(csr)
}

fn write_region(buf: &mut Vec<u8>, csr: &BatchCsr, ids: std::ops::Range<u64>) -> Result<()> {
    buf.extend_from_slice(&(ids.end - ids.start).to_le_bytes());
    for v in ids {
        // Head slots are laid out ascending, tail slots descending; the
        // reader mirrors the same walk.
        let v = if v >= csr.min_tail_id() {
            csr.max_id() - 1 - (v - csr.min_tail_id())
        } else {
            v
        };
        let entries = csr.neighbors(v);
        let count: u32 = entries
            .len()
            .try_into()
            .map_err(|_| FragmaError::InvalidArgument("slot exceeds u32 entries".into()))?;
        buf.extend_from_slice(&count.to_le_bytes());
        for entry in entries {
            buf.extend_from_slice(&entry.nbr.to_le_bytes());
            write_value(buf, &entry.data)?;
        }
    }
    Ok(())
}

fn read_region(cursor: &mut Cursor<'_>, expected: u64) -> Result<Vec<Vec<CsrEdge>>> {
    let count = cursor.read_u64()?;
    if count != expected {
        return Err(FragmaError::Corruption(format!(
            "archive region holds {count} slots, id range implies {expected}"
        )));
    }
    let mut slots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let entries = cursor.read_u32()? as usize;
        let mut slot = Vec::with_capacity(entries);
        for _ in 0..entries {
            let nbr = cursor.read_u64()?;
            let data = read_value(cursor)?;
            slot.push(CsrEdge { nbr, data });
        }
        slots.push(slot);
    }
    Ok(slots)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        Value::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STRING);
            write_string(buf, s)?;
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            let len: u32 = items
                .len()
                .try_into()
                .map_err(|_| FragmaError::InvalidArgument("list exceeds u32 length".into()))?;
            buf.extend_from_slice(&len.to_le_bytes());
            for item in items {
                write_value(buf, item)?;
            }
        }
        Value::Map(map) => {
            buf.push(TAG_MAP);
            let len: u32 = map
                .len()
                .try_into()
                .map_err(|_| FragmaError::InvalidArgument("map exceeds u32 length".into()))?;
            buf.extend_from_slice(&len.to_le_bytes());
            for (key, item) in map {
                write_string(buf, key)?;
                write_value(buf, item)?;
            }
        }
    }
    Ok(())
}

fn read_value(cursor: &mut Cursor<'_>) -> Result<Value> {
    let tag = cursor.read_u8()?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => match cursor.read_u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(FragmaError::Corruption(format!(
                "invalid boolean encoding: {other}"
            ))),
        },
        TAG_INT => Ok(Value::Int(i64::from_le_bytes(cursor.read_array()?))),
        TAG_FLOAT => Ok(Value::Float(f64::from_le_bytes(cursor.read_array()?))),
        TAG_STRING => Ok(Value::Str(cursor.read_string()?)),
        TAG_LIST => {
            let len = cursor.read_u32()? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_value(cursor)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let len = cursor.read_u32()? as usize;
            let mut map = std::collections::BTreeMap::new();
            for _ in 0..len {
                let key = cursor.read_string()?;
                let item = read_value(cursor)?;
                map.insert(key, item);
            }
            Ok(Value::Map(map))
        }
        other => Err(FragmaError::Corruption(format!(
            "unknown value tag: 0x{other:02X}"
        ))),
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| FragmaError::InvalidArgument("string length exceeds u32::MAX".into()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.index + len > self.data.len() {
            return Err(FragmaError::Corruption("unexpected end of payload".into()));
        }
        let start = self.index;
        self.index += len;
        Ok(&self.data[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self
            .read_exact(N)?
            .try_into()
            .expect("slice has exactly N bytes"))
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FragmaError::Corruption(format!(
                "invalid flag encoding: {other}"
            ))),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FragmaError::Corruption("invalid UTF-8 string".into()))
    }

    fn ensure_consumed(&self) -> Result<()> {
        if self.index != self.data.len() {
            return Err(FragmaError::Corruption(
                "unexpected trailing bytes in payload".into(),
            ));
        }
        Ok(())
    }
}
