//! Lazy reads of stored objects, whole or by byte range.
//!
//! An [`ObjectReader`] fetches one part at a time, each in its own short
//! read transaction, and copies the bytes out before the transaction ends.
//! A large download therefore never holds a snapshot open for its whole
//! duration; the cost is that an object replaced mid-read may be observed
//! as a mix of old and new parts.

use std::io;

use bytes::Bytes;

use super::kv::KvStore;
use super::object::{part_key, Object, ObjectPart};
use crate::errors::S3Error;

// ── Range headers ───────────────────────────────────────────────────

/// A single range from a `Range: bytes=...` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    Closed(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`, the last n bytes.
    Suffix(u64),
}

/// Parse a `Range` header value. Anything malformed, including multiple
/// ranges, yields `None` and the object is served in full.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    match (start.is_empty(), end.is_empty()) {
        (false, false) => {
            let (a, b) = (start.parse().ok()?, end.parse().ok()?);
            (a <= b).then_some(ByteRange::Closed(a, b))
        }
        (false, true) => Some(ByteRange::From(start.parse().ok()?)),
        (true, false) => Some(ByteRange::Suffix(end.parse().ok()?)),
        (true, true) => None,
    }
}

/// Resolve a range against an object of `total` bytes into inclusive
/// `(start, end)` offsets. `None` means the range is not satisfiable.
pub fn resolve_range(range: ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    let last = total - 1;
    match range {
        ByteRange::Closed(a, b) if a <= last => Some((a, b.min(last))),
        ByteRange::From(a) if a <= last => Some((a, last)),
        ByteRange::Suffix(n) if n > 0 => Some((total.saturating_sub(n), last)),
        _ => None,
    }
}

/// `Content-Range` header value.
pub fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

// ── Reader ──────────────────────────────────────────────────────────

/// Single-pass reader over an object's parts.
pub struct ObjectReader {
    kv: KvStore,
    bucket: String,
    name: String,
    parts: Vec<ObjectPart>,
    /// Index into `parts` of the next part to fetch.
    next_part: usize,
    /// Offset into the first fetched part where reading starts.
    skip: usize,
    buf: Bytes,
    remaining: u64,
}

impl ObjectReader {
    /// Reader over the whole object.
    pub fn full(kv: KvStore, bucket: &str, object: &Object) -> Self {
        Self {
            kv,
            bucket: bucket.to_string(),
            name: object.name.clone(),
            parts: object.parts.clone(),
            next_part: 0,
            skip: 0,
            buf: Bytes::new(),
            remaining: object.length,
        }
    }

    /// Reader over the inclusive byte range `[start, end]`.
    pub fn ranged(kv: KvStore, bucket: &str, object: &Object, start: u64, end: u64) -> Self {
        let mut reader = Self::full(kv, bucket, object);
        reader.remaining = end
            .saturating_sub(start)
            .saturating_add(1)
            .min(object.length.saturating_sub(start));

        let first = object
            .parts
            .iter()
            .position(|p| start < p.start + p.length)
            .unwrap_or(object.parts.len());
        reader.next_part = first;
        if let Some(part) = object.parts.get(first) {
            reader.skip = (start - part.start) as usize;
        }
        reader
    }

    /// Bytes still to be produced.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Next run of bytes, at most one part long. `None` once the requested
    /// length has been produced.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>, S3Error> {
        self.take(usize::MAX)
    }

    fn take(&mut self, max: usize) -> Result<Option<Bytes>, S3Error> {
        if self.remaining == 0 {
            return Ok(None);
        }
        while self.buf.is_empty() {
            self.fetch_next_part()?;
        }
        let n = self
            .buf
            .len()
            .min(max)
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let chunk = self.buf.split_to(n);
        self.remaining -= n as u64;
        Ok(Some(chunk))
    }

    fn fetch_next_part(&mut self) -> Result<(), S3Error> {
        let part = self.parts.get(self.next_part).ok_or_else(|| {
            S3Error::internal(format!(
                "object {}/{} ran out of parts with {} bytes outstanding",
                self.bucket, self.name, self.remaining
            ))
        })?;
        let key = part_key(&self.name, part.part_number);
        let data = self
            .kv
            .view(|tx| tx.get(&self.bucket, &key))?
            .ok_or_else(|| {
                S3Error::internal(format!(
                    "object {}/{} is missing part {}",
                    self.bucket, self.name, part.part_number
                ))
            })?;

        let mut data = Bytes::from(data);
        let skip = std::mem::take(&mut self.skip);
        if skip > data.len() {
            return Err(S3Error::internal(format!(
                "object {}/{} part {} is shorter than its descriptor",
                self.bucket, self.name, part.part_number
            )));
        }
        self.buf = data.split_off(skip);
        self.next_part += 1;
        Ok(())
    }
}

impl io::Read for ObjectReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        match self.take(out.len()) {
            Ok(Some(chunk)) => {
                out[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Ok(None) => Ok(0),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object::{encode, meta_key, md5_hex};
    use std::collections::BTreeMap;
    use std::io::Read;

    /// Store `parts` as one object named "obj" in bucket "b".
    fn store(parts: &[&[u8]]) -> (KvStore, Object) {
        let kv = KvStore::in_memory().unwrap();
        let content: Vec<u8> = parts.concat();
        let obj = Object::new(
            "obj",
            BTreeMap::new(),
            md5_hex(&content),
            parts.iter().map(|p| p.len() as u64),
        );
        kv.update(|tx| {
            tx.create_keyspace("b")?;
            tx.put("b", &meta_key("obj"), &encode(&obj)?)?;
            for (part, data) in obj.parts.iter().zip(parts) {
                tx.put("b", &part_key("obj", part.part_number), data)?;
            }
            Ok(())
        })
        .unwrap();
        (kv, obj)
    }

    fn read_all(mut reader: ObjectReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    // ── Range parsing ───────────────────────────────────────────────

    #[test]
    fn test_parse_range_header() {
        assert_eq!(parse_range_header("bytes=0-4"), Some(ByteRange::Closed(0, 4)));
        assert_eq!(parse_range_header("bytes=5-"), Some(ByteRange::From(5)));
        assert_eq!(parse_range_header("bytes=-3"), Some(ByteRange::Suffix(3)));
        assert_eq!(parse_range_header("bytes=4-0"), None);
        assert_eq!(parse_range_header("bytes=0-1,3-4"), None);
        assert_eq!(parse_range_header("items=0-4"), None);
        assert_eq!(parse_range_header("bytes=-"), None);
        assert_eq!(parse_range_header("bytes=a-b"), None);
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(ByteRange::Closed(0, 4), 11), Some((0, 4)));
        assert_eq!(resolve_range(ByteRange::Closed(6, 100), 11), Some((6, 10)));
        assert_eq!(resolve_range(ByteRange::From(10), 11), Some((10, 10)));
        assert_eq!(resolve_range(ByteRange::Suffix(5), 11), Some((6, 10)));
        assert_eq!(resolve_range(ByteRange::Suffix(50), 11), Some((0, 10)));
        assert_eq!(resolve_range(ByteRange::Closed(20, 25), 11), None);
        assert_eq!(resolve_range(ByteRange::From(11), 11), None);
        assert_eq!(resolve_range(ByteRange::Suffix(0), 11), None);
        assert_eq!(resolve_range(ByteRange::Closed(0, 0), 0), None);
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(0, 4, 11), "bytes 0-4/11");
    }

    // ── Reader ──────────────────────────────────────────────────────

    #[test]
    fn test_full_read_across_parts() {
        let (kv, obj) = store(&[b"hello", b" ", b"world"]);
        assert_eq!(read_all(ObjectReader::full(kv, "b", &obj)), b"hello world");
    }

    #[test]
    fn test_next_chunk_yields_one_part_at_a_time() {
        let (kv, obj) = store(&[b"abc", b"de"]);
        let mut reader = ObjectReader::full(kv, "b", &obj);
        assert_eq!(reader.next_chunk().unwrap().unwrap(), "abc");
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.next_chunk().unwrap().unwrap(), "de");
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_ranged_read_within_first_part() {
        let (kv, obj) = store(&[b"hello world"]);
        assert_eq!(read_all(ObjectReader::ranged(kv, "b", &obj, 0, 4)), b"hello");
    }

    #[test]
    fn test_ranged_read_spanning_parts() {
        let (kv, obj) = store(&[b"0123", b"4567", b"89"]);
        assert_eq!(read_all(ObjectReader::ranged(kv.clone(), "b", &obj, 3, 8)), b"345678");
        assert_eq!(read_all(ObjectReader::ranged(kv.clone(), "b", &obj, 4, 4)), b"4");
        assert_eq!(read_all(ObjectReader::ranged(kv.clone(), "b", &obj, 8, 100)), b"89");
        assert_eq!(read_all(ObjectReader::ranged(kv, "b", &obj, 6, u64::MAX)), b"6789");
    }

    #[test]
    fn test_small_buffer_reads() {
        let (kv, obj) = store(&[b"abcdef", b"ghij"]);
        let mut reader = ObjectReader::ranged(kv, "b", &obj, 2, 7);
        let mut buf = [0u8; 3];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"cdefgh");
    }

    #[test]
    fn test_empty_object_reads_nothing() {
        let (kv, obj) = store(&[]);
        let mut reader = ObjectReader::full(kv, "b", &obj);
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_missing_parts_is_internal_error() {
        let (kv, mut obj) = store(&[b"abc"]);
        obj.length = 10;
        let mut reader = ObjectReader::full(kv, "b", &obj);
        assert_eq!(reader.next_chunk().unwrap().unwrap(), "abc");
        let err = reader.next_chunk().unwrap_err();
        assert_eq!(err.code(), "InternalError");
    }
}
