//! Stored records and the key layout inside a bucket keyspace.
//!
//! ```text
//! meta\x01<name>                         object descriptor (JSON)
//! data\x01<name>\x03<part u32 BE>        object part bytes
//! upload\x01<id>                         multipart upload record (JSON)
//! upload\x01<id>\x01part<part u32 BE>    uploaded part bytes
//! ```
//!
//! Descriptors sit under their own prefix so listing scans never touch
//! part data. Part numbers are big-endian so keys sort numerically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::kv::KvRead;
use crate::errors::S3Error;

pub const META_PREFIX: &[u8] = b"meta\x01";
const DATA_PREFIX: &[u8] = b"data\x01";
pub const UPLOAD_PREFIX: &[u8] = b"upload\x01";

/// One stored piece of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPart {
    pub part_number: u32,
    /// Offset of this part within the object.
    pub start: u64,
    pub length: u64,
}

/// Object descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub name: String,
    /// `x-amz-meta-*` headers and `content-type`, keyed by lowercase name.
    pub metadata: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
    pub length: u64,
    /// Hex, unquoted.
    pub etag: String,
    pub parts: Vec<ObjectPart>,
}

impl Object {
    /// Describe an object whose content is the given part lengths in order.
    pub fn new(
        name: &str,
        metadata: BTreeMap<String, String>,
        etag: String,
        part_lengths: impl IntoIterator<Item = u64>,
    ) -> Self {
        let mut parts = Vec::new();
        let mut start = 0;
        for (i, length) in part_lengths.into_iter().enumerate() {
            parts.push(ObjectPart {
                part_number: i as u32,
                start,
                length,
            });
            start += length;
        }
        Self {
            name: name.to_string(),
            metadata,
            last_modified: Utc::now(),
            length: start,
            etag,
            parts,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get("content-type").map(String::as_str)
    }
}

/// A part received for a pending multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Pending multipart upload record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub bucket: String,
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    pub initiated: DateTime<Utc>,
    pub parts: BTreeMap<u32, UploadedPart>,
}

/// Entry in the bucket registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

// ── Keys ────────────────────────────────────────────────────────────

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

pub fn meta_key(name: &str) -> Vec<u8> {
    concat(&[META_PREFIX, name.as_bytes()])
}

pub fn part_key(name: &str, part_number: u32) -> Vec<u8> {
    concat(&[
        DATA_PREFIX,
        name.as_bytes(),
        b"\x03",
        &part_number.to_be_bytes(),
    ])
}

pub fn upload_key(upload_id: &str) -> Vec<u8> {
    concat(&[UPLOAD_PREFIX, upload_id.as_bytes()])
}

pub fn upload_part_prefix(upload_id: &str) -> Vec<u8> {
    concat(&[UPLOAD_PREFIX, upload_id.as_bytes(), b"\x01part"])
}

pub fn upload_part_key(upload_id: &str, part_number: u32) -> Vec<u8> {
    let mut key = upload_part_prefix(upload_id);
    key.extend_from_slice(&part_number.to_be_bytes());
    key
}

/// Object name from a descriptor key, if it is one.
pub fn name_from_meta_key(key: &[u8]) -> Option<&str> {
    key.strip_prefix(META_PREFIX)
        .and_then(|n| std::str::from_utf8(n).ok())
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Lowercase hex MD5.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Read and decode a JSON record.
pub fn load<T: DeserializeOwned>(
    tx: &impl KvRead,
    keyspace: &str,
    key: &[u8],
) -> Result<Option<T>, S3Error> {
    match tx.get(keyspace, key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, S3Error> {
    Ok(serde_json::to_vec(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_new_lays_out_parts() {
        let obj = Object::new("k", BTreeMap::new(), "e".into(), [4, 4, 2]);
        assert_eq!(obj.length, 10);
        let starts: Vec<u64> = obj.parts.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![0, 4, 8]);
        let numbers: Vec<u32> = obj.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_object_has_no_parts() {
        let obj = Object::new("k", BTreeMap::new(), md5_hex(b""), Vec::<u64>::new());
        assert_eq!(obj.length, 0);
        assert!(obj.parts.is_empty());
        assert_eq!(obj.etag, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_part_keys_sort_numerically() {
        assert!(part_key("k", 2) < part_key("k", 10));
        assert!(upload_part_key("u", 9) < upload_part_key("u", 256));
    }

    #[test]
    fn test_descriptor_and_data_namespaces_disjoint() {
        assert!(!part_key("k", 0).starts_with(META_PREFIX));
        assert!(!upload_key("u").starts_with(META_PREFIX));
        assert_eq!(name_from_meta_key(&meta_key("a/b")), Some("a/b"));
        assert_eq!(name_from_meta_key(&part_key("a", 0)), None);
    }

    #[test]
    fn test_upload_part_keys_under_prefix() {
        let prefix = upload_part_prefix("abc");
        assert!(upload_part_key("abc", 1).starts_with(&prefix));
        assert!(prefix.starts_with(&upload_key("abc")));
    }
}
