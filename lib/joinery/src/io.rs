use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::constants::{CONTAINER_MAGIC, CONTAINER_VALUE_TYPE, CONTAINER_VERSION};
use crate::error::{FormatError, JoinError};
use crate::record::Any;
use crate::wire::{write_str, Wire, WireReader};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

/// Regular files under `path`, in a stable order. A plain file yields itself.
pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, JoinError> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path.as_ref()).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

// ========== Framed records: [klen u32 LE][vlen u32 LE][key][value] ==========

/// One framed record inside a buffer.
pub struct Frame<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub value_range: Range<usize>,
    pub next: usize,
}

pub fn write_frame<K: Wire, V: Wire>(buf: &mut Vec<u8>, key: &K, value: &V) -> Result<(), FormatError> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 8]);
    let written = key.write_to(buf).and_then(|_| {
        let klen = buf.len() - start - 8;
        value.write_to(buf)?;
        Ok((klen, buf.len() - start - 8 - klen))
    });
    let lengths = written.and_then(|(klen, vlen)| Ok((frame_len(klen)?, frame_len(vlen)?)));
    match lengths {
        Ok((klen, vlen)) => {
            buf[start..start + 4].copy_from_slice(&klen.to_le_bytes());
            buf[start + 4..start + 8].copy_from_slice(&vlen.to_le_bytes());
            Ok(())
        }
        Err(e) => {
            buf.truncate(start);
            Err(e)
        }
    }
}

pub fn write_raw_frame(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) -> Result<(), FormatError> {
    let (klen, vlen) = (frame_len(key.len())?, frame_len(value.len())?);
    buf.extend_from_slice(&klen.to_le_bytes());
    buf.extend_from_slice(&vlen.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    Ok(())
}

/// Frame length prefixes are u32; longer keys or values cannot be framed.
fn frame_len(len: usize) -> Result<u32, FormatError> { u32::try_from(len).map_err(|_| FormatError::FrameTooLong(len)) }

/// Reads the frame starting at `off`; `Ok(None)` at the end of the buffer.
pub fn read_frame(bytes: &[u8], off: usize) -> Result<Option<Frame<'_>>, FormatError> {
    if off == bytes.len() {
        return Ok(None);
    }
    let available = bytes.len().saturating_sub(off);
    if available < 8 {
        return Err(FormatError::Truncated { needed: 8, available });
    }
    let klen = u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]) as usize;
    let vlen = u32::from_le_bytes([bytes[off + 4], bytes[off + 5], bytes[off + 6], bytes[off + 7]]) as usize;
    let key_start = off + 8;
    let value_start = key_start + klen;
    let end = value_start + vlen;
    if end > bytes.len() {
        return Err(FormatError::Truncated { needed: 8 + klen + vlen, available });
    }
    Ok(Some(Frame {
        key: &bytes[key_start..value_start],
        value: &bytes[value_start..end],
        value_range: value_start..end,
        next: end,
    }))
}

// ========== Record container ==========

/// Append-only container of (key, `Any`) records.
pub struct ContainerWriter<W: Write> {
    inner: W,
    frame: Vec<u8>,
    records: u64,
}

impl ContainerWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let writer = open_writer(path.as_ref())?;
        Self::new(writer).with_context(|| format!("write header {}", path.as_ref().display()))
    }
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(mut inner: W) -> Result<Self, JoinError> {
        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(CONTAINER_MAGIC);
        header.push(CONTAINER_VERSION);
        write_str(&mut header, CONTAINER_VALUE_TYPE)?;
        inner.write_all(&header)?;
        Ok(Self { inner, frame: Vec::new(), records: 0 })
    }

    pub fn append(&mut self, key: &[u8], value: &Any) -> Result<(), JoinError> {
        self.frame.clear();
        let value_bytes = value.encode()?;
        write_raw_frame(&mut self.frame, key, &value_bytes)?;
        self.inner.write_all(&self.frame)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 { self.records }

    pub fn finish(mut self) -> Result<W, JoinError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Parses a whole container image.
pub fn parse_container(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Any)>, FormatError> {
    if bytes.len() < CONTAINER_MAGIC.len() + 1 || &bytes[..4] != CONTAINER_MAGIC || bytes[4] != CONTAINER_VERSION {
        return Err(FormatError::BadHeader);
    }
    let mut reader = WireReader::new(&bytes[5..]);
    if reader.read_str()? != CONTAINER_VALUE_TYPE {
        return Err(FormatError::BadHeader);
    }
    let mut off = bytes.len() - reader.remaining();
    let mut records = Vec::new();
    while let Some(frame) = read_frame(bytes, off)? {
        records.push((frame.key.to_vec(), Any::decode(frame.value)?));
        off = frame.next;
    }
    Ok(records)
}

pub fn read_container(path: impl AsRef<Path>) -> Result<Vec<(Vec<u8>, Any)>, JoinError> {
    let file = File::open(path.as_ref())?;
    if file.metadata()?.len() == 0 {
        return Err(FormatError::BadHeader.into());
    }
    // read-only mapping; input files are not modified while a job runs
    let map = unsafe { Mmap::map(&file) }?;
    Ok(parse_container(&map[..])?)
}

pub fn read_container_values(path: impl AsRef<Path>) -> Result<Vec<Any>, JoinError> {
    Ok(read_container(path)?.into_iter().map(|(_, v)| v).collect())
}

pub fn write_container<'a>(path: impl AsRef<Path>, values: impl IntoIterator<Item = &'a Any>) -> Result<u64> {
    let mut writer = ContainerWriter::create(path.as_ref())?;
    for value in values {
        writer.append(&[], value).with_context(|| format!("append {}", path.as_ref().display()))?;
    }
    let records = writer.records();
    writer.finish().with_context(|| format!("flush {}", path.as_ref().display()))?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Session, User};

    #[test]
    fn frames_walk_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &1u32, &Any::url("a")).unwrap();
        write_frame(&mut buf, &2u32, &Any::url("bb")).unwrap();
        let first = read_frame(&buf, 0).unwrap().unwrap();
        assert_eq!(u32::decode(first.key).unwrap(), 1);
        assert_eq!(Any::decode(first.value).unwrap(), Any::url("a"));
        let second = read_frame(&buf, first.next).unwrap().unwrap();
        assert_eq!(&buf[second.value_range.clone()], second.value);
        assert!(read_frame(&buf, second.next).unwrap().is_none());
    }

    #[test]
    fn failed_encode_leaves_buffer_untouched() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &1u32, &Any::url("ok")).unwrap();
        let len = buf.len();
        let huge = Any::url("x".repeat(70_000));
        assert!(write_frame(&mut buf, &2u32, &huge).is_err());
        assert_eq!(buf.len(), len);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_frame_lengths_rejected() {
        assert_eq!(frame_len(u32::MAX as usize), Ok(u32::MAX));
        assert_eq!(frame_len(u32::MAX as usize + 1), Err(FormatError::FrameTooLong(u32::MAX as usize + 1)));
    }

    #[test]
    fn missing_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(list_files_recursive(dir.path().join("absent")), Err(JoinError::Io(_))));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &1u32, &Any::url("abc")).unwrap();
        buf.pop();
        assert!(matches!(read_frame(&buf, 0), Err(FormatError::Truncated { .. })));
        assert!(matches!(read_frame(&buf[..5], 0), Err(FormatError::Truncated { needed: 8, available: 5 })));
    }

    #[test]
    fn container_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/records.jnr");
        let values = vec![
            Any::user(User::new(1, vec![1, 2])),
            Any::session(Session::new(1, "x", vec![3])),
            Any::url("y"),
        ];
        assert_eq!(write_container(&path, &values).unwrap(), 3);
        assert_eq!(read_container_values(&path).unwrap(), values);
        assert_eq!(list_files_recursive(dir.path()).unwrap(), vec![path]);
    }

    #[test]
    fn bad_header_rejected() {
        assert_eq!(parse_container(b"NOPE\x01"), Err(FormatError::BadHeader));
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(read_container(&empty), Err(JoinError::Format(FormatError::BadHeader))));
    }

    #[test]
    fn empty_container_has_no_records() {
        let mut writer = ContainerWriter::new(Vec::new()).unwrap();
        writer.append(b"k", &Any::url("u")).unwrap();
        let bytes = writer.finish().unwrap();
        let parsed = parse_container(&bytes).unwrap();
        assert_eq!(parsed, vec![(b"k".to_vec(), Any::url("u"))]);
        let header_only = ContainerWriter::new(Vec::new()).unwrap().finish().unwrap();
        assert!(parse_container(&header_only).unwrap().is_empty());
    }
}
