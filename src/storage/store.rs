//! The object store: buckets and objects on top of [`KvStore`].
//!
//! Every mutation is one write transaction, so an overwrite that removes
//! the old object and writes the new one either happens completely or not
//! at all. Methods are async and run their transaction on the blocking
//! pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use super::kv::{KvRead, KvStore, WriteTx, REGISTRY};
use super::object::{
    encode, load, md5_hex, meta_key, name_from_meta_key, part_key, BucketInfo, Object, META_PREFIX,
};
use super::reader::{resolve_range, ByteRange, ObjectReader};
use crate::config::{MultipartEtag, StorageConfig};
use crate::errors::S3Error;
use crate::events::{Event, EventName, NotificationSink};

/// Longest object name accepted, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Default page size for object listings.
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// One page of an object listing.
#[derive(Debug, Clone)]
pub struct ObjectListing {
    pub objects: Vec<Object>,
    pub is_truncated: bool,
}

/// An object opened for reading.
pub struct ObjectRead {
    pub object: Object,
    /// Inclusive byte range being served, when one was requested.
    pub range: Option<(u64, u64)>,
    pub reader: ObjectReader,
}

pub struct ObjectStore {
    kv: KvStore,
    region: String,
    part_size: usize,
    pub(crate) multipart_etag: MultipartEtag,
    events: Arc<dyn NotificationSink>,
}

impl ObjectStore {
    pub fn new(
        kv: KvStore,
        region: &str,
        config: &StorageConfig,
        events: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            kv,
            region: region.to_string(),
            part_size: config.part_size.max(1),
            multipart_etag: config.multipart_etag,
            events,
        }
    }

    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// Run `f` against the store on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T, S3Error>
    where
        T: Send + 'static,
        F: FnOnce(&KvStore) -> Result<T, S3Error> + Send + 'static,
    {
        let kv = self.kv.clone();
        tokio::task::spawn_blocking(move || f(&kv)).await?
    }

    pub(crate) fn emit(&self, name: EventName, bucket: &str, object: &Object) {
        self.events.notify(Event::new(
            &self.region,
            name,
            bucket,
            &object.name,
            object.length,
            &object.etag,
            object.last_modified,
        ));
    }

    // ── Buckets ─────────────────────────────────────────────────────

    pub async fn create_bucket(&self, name: &str) -> Result<BucketInfo, S3Error> {
        validate_bucket_name(name)?;
        let name = name.to_string();
        let info = self
            .blocking(move |kv| {
                kv.update(|tx| {
                    if tx.get(REGISTRY, name.as_bytes())?.is_some() {
                        return Err(S3Error::BucketAlreadyExists { bucket: name.clone() });
                    }
                    let info = BucketInfo {
                        name: name.clone(),
                        created: Utc::now(),
                    };
                    tx.put(REGISTRY, name.as_bytes(), &encode(&info)?)?;
                    tx.create_keyspace(&name)?;
                    Ok(info)
                })
            })
            .await?;
        debug!(bucket = %info.name, "created bucket");
        Ok(info)
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<(), S3Error> {
        let name = name.to_string();
        self.blocking(move |kv| {
            kv.update(|tx| {
                require_bucket(tx, &name)?;
                let mut empty = true;
                tx.scan_prefix(&name, b"", |_, _| {
                    empty = false;
                    Ok(false)
                })?;
                if !empty {
                    return Err(S3Error::BucketNotEmpty { bucket: name.clone() });
                }
                tx.delete_keyspace(&name)?;
                tx.delete(REGISTRY, name.as_bytes())?;
                Ok(())
            })
        })
        .await?;
        Ok(())
    }

    pub async fn head_bucket(&self, name: &str) -> Result<BucketInfo, S3Error> {
        let name = name.to_string();
        self.blocking(move |kv| kv.view(|tx| require_bucket(tx, &name)))
            .await
    }

    /// All buckets, sorted by name.
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>, S3Error> {
        self.blocking(|kv| {
            kv.view(|tx| {
                let mut buckets = Vec::new();
                tx.scan_prefix(REGISTRY, b"", |_, v| {
                    buckets.push(serde_json::from_slice::<BucketInfo>(v)?);
                    Ok(true)
                })?;
                Ok(buckets)
            })
        })
        .await
    }

    // ── Objects ─────────────────────────────────────────────────────

    /// Store `content` as `bucket/name`, replacing any existing object.
    pub async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
        content: Bytes,
    ) -> Result<Object, S3Error> {
        validate_key(name)?;
        let chunks: Vec<Bytes> = split_parts(&content, self.part_size);
        let object = Object::new(
            name,
            metadata,
            md5_hex(&content),
            chunks.iter().map(|c| c.len() as u64),
        );

        let bucket_name = bucket.to_string();
        let stored = object.clone();
        self.blocking(move |kv| {
            kv.update(|tx| {
                require_bucket(tx, &bucket_name)?;
                remove_object(tx, &bucket_name, &stored.name)?;
                write_object(tx, &bucket_name, &stored, chunks.iter().map(|c| c.as_ref()))
            })
        })
        .await?;

        debug!(bucket, key = name, size = object.length, etag = %object.etag, "stored object");
        self.emit(EventName::ObjectCreatedPut, bucket, &object);
        Ok(object)
    }

    pub async fn head_object(&self, bucket: &str, name: &str) -> Result<Object, S3Error> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        self.blocking(move |kv| kv.view(|tx| require_object(tx, &bucket, &name)))
            .await
    }

    /// Open an object for streaming, optionally restricted to `range`.
    pub async fn get_object(
        &self,
        bucket: &str,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectRead, S3Error> {
        let object = self.head_object(bucket, name).await?;
        match range {
            None => Ok(ObjectRead {
                reader: ObjectReader::full(self.kv.clone(), bucket, &object),
                range: None,
                object,
            }),
            Some(range) => {
                let (start, end) =
                    resolve_range(range, object.length).ok_or(S3Error::InvalidRange)?;
                Ok(ObjectRead {
                    reader: ObjectReader::ranged(self.kv.clone(), bucket, &object, start, end),
                    range: Some((start, end)),
                    object,
                })
            }
        }
    }

    /// Delete an object. Deleting an object that does not exist succeeds.
    pub async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), S3Error> {
        let bucket_name = bucket.to_string();
        let key = name.to_string();
        let removed = self
            .blocking(move |kv| {
                kv.update(|tx| {
                    require_bucket(tx, &bucket_name)?;
                    remove_object(tx, &bucket_name, &key)
                })
            })
            .await?;

        if let Some(mut object) = removed {
            object.last_modified = Utc::now();
            self.emit(EventName::ObjectRemovedDelete, bucket, &object);
        }
        Ok(())
    }

    /// Objects whose names start with `prefix`, in name order.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
    ) -> Result<ObjectListing, S3Error> {
        let bucket = bucket.to_string();
        let mut seek = META_PREFIX.to_vec();
        seek.extend_from_slice(prefix.as_bytes());

        self.blocking(move |kv| {
            kv.view(|tx| {
                require_bucket(tx, &bucket)?;
                let mut listing = ObjectListing {
                    objects: Vec::new(),
                    is_truncated: false,
                };
                tx.scan_prefix(&bucket, &seek, |k, v| {
                    if name_from_meta_key(k).is_none() {
                        return Ok(true);
                    }
                    if listing.objects.len() == max_keys {
                        listing.is_truncated = true;
                        return Ok(false);
                    }
                    listing.objects.push(serde_json::from_slice(v)?);
                    Ok(true)
                })?;
                Ok(listing)
            })
        })
        .await
    }

    /// Copy `src_bucket/src_name` to `dst_bucket/dst_name`, replacing any
    /// existing destination object.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_name: &str,
        dst_bucket: &str,
        dst_name: &str,
    ) -> Result<Object, S3Error> {
        validate_key(dst_name)?;
        let (sb, sn) = (src_bucket.to_string(), src_name.to_string());
        let (db, dn) = (dst_bucket.to_string(), dst_name.to_string());

        let object = self
            .blocking(move |kv| {
                kv.update(|tx| {
                    let source = require_object(tx, &sb, &sn)?;
                    require_bucket(tx, &db)?;

                    let mut copy = source.clone();
                    copy.name = dn.clone();
                    copy.last_modified = Utc::now();

                    if sb == db && sn == dn {
                        tx.put(&db, &meta_key(&dn), &encode(&copy)?)?;
                        return Ok(copy);
                    }

                    let mut data = Vec::with_capacity(source.parts.len());
                    for part in &source.parts {
                        let number = part.part_number;
                        let bytes = tx.get(&sb, &part_key(&sn, number))?.ok_or_else(|| {
                            S3Error::internal(format!("object {sb}/{sn} is missing part {number}"))
                        })?;
                        data.push(bytes);
                    }

                    remove_object(tx, &db, &dn)?;
                    write_object(tx, &db, &copy, data.iter().map(Vec::as_slice))?;
                    Ok(copy)
                })
            })
            .await?;

        self.emit(EventName::ObjectCreatedCopy, dst_bucket, &object);
        Ok(object)
    }
}

// ── Transaction helpers ─────────────────────────────────────────────

pub(crate) fn require_bucket(tx: &impl KvRead, bucket: &str) -> Result<BucketInfo, S3Error> {
    load(tx, REGISTRY, bucket.as_bytes())?.ok_or_else(|| S3Error::NoSuchBucket {
        bucket: bucket.to_string(),
    })
}

pub(crate) fn require_object(
    tx: &impl KvRead,
    bucket: &str,
    name: &str,
) -> Result<Object, S3Error> {
    require_bucket(tx, bucket)?;
    load(tx, bucket, &meta_key(name))?.ok_or_else(|| S3Error::NoSuchKey {
        key: name.to_string(),
    })
}

/// Delete an object's descriptor and all of its parts.
pub(crate) fn remove_object(
    tx: &WriteTx,
    bucket: &str,
    name: &str,
) -> Result<Option<Object>, S3Error> {
    let Some(existing) = load::<Object>(tx, bucket, &meta_key(name))? else {
        return Ok(None);
    };
    tx.delete(bucket, &meta_key(name))?;
    for part in &existing.parts {
        tx.delete(bucket, &part_key(name, part.part_number))?;
    }
    Ok(Some(existing))
}

/// Write a descriptor and its part bytes. `data` yields one slice per
/// entry of `object.parts`.
pub(crate) fn write_object<'a>(
    tx: &WriteTx,
    bucket: &str,
    object: &Object,
    data: impl Iterator<Item = &'a [u8]>,
) -> Result<(), S3Error> {
    tx.put(bucket, &meta_key(&object.name), &encode(object)?)?;
    for (part, bytes) in object.parts.iter().zip(data) {
        tx.put(bucket, &part_key(&object.name, part.part_number), bytes)?;
    }
    Ok(())
}

fn split_parts(content: &Bytes, part_size: usize) -> Vec<Bytes> {
    let mut parts = Vec::new();
    let mut offset = 0;
    while offset < content.len() {
        let end = (offset + part_size).min(content.len());
        parts.push(content.slice(offset..end));
        offset = end;
    }
    parts
}

// ── Validation ──────────────────────────────────────────────────────

/// Bucket names are 3-63 characters of lowercase letters, digits, `.` and
/// `-`, beginning and ending with a letter or digit.
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let invalid = || S3Error::InvalidBucketName {
        name: name.to_string(),
    };
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return Err(invalid());
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-')
    {
        return Err(invalid());
    }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) || name.contains("..") {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_key(name: &str) -> Result<(), S3Error> {
    if name.is_empty() {
        return Err(S3Error::InvalidArgument {
            message: "Object key must not be empty".to_string(),
        });
    }
    if name.len() > MAX_KEY_LENGTH {
        return Err(S3Error::KeyTooLongError);
    }
    Ok(())
}
