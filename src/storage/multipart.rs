//! Multipart uploads.
//!
//! An upload is initiated, receives parts, and is then either completed
//! into an ordinary object or aborted. Both end states delete the upload
//! record and every stored part; neither can be left again.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use md5::{Digest, Md5};
use tracing::{debug, info};

use super::kv::{KvRead, WriteTx};
use super::object::{
    encode, load, md5_hex, meta_key, part_key, upload_key, upload_part_key, upload_part_prefix,
    MultipartUpload, Object, UploadedPart, UPLOAD_PREFIX,
};
use super::store::{remove_object, require_bucket, validate_key, ObjectStore};
use crate::config::MultipartEtag;
use crate::errors::S3Error;
use crate::events::EventName;
use crate::xml::CompletedPart;

/// Highest part number a client may use.
pub const MAX_PART_NUMBER: u32 = 10_000;

impl ObjectStore {
    /// Start an upload and return its record.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<MultipartUpload, S3Error> {
        validate_key(name)?;
        let initiated = Utc::now();
        let timestamp = initiated.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let upload = MultipartUpload {
            upload_id: upload_id(bucket, name, &timestamp),
            bucket: bucket.to_string(),
            name: name.to_string(),
            metadata,
            initiated,
            parts: BTreeMap::new(),
        };

        let record = upload.clone();
        self.blocking(move |kv| {
            kv.update(|tx| {
                require_bucket(tx, &record.bucket)?;
                tx.put(&record.bucket, &upload_key(&record.upload_id), &encode(&record)?)
            })
        })
        .await?;

        info!(bucket, key = name, upload_id = %upload.upload_id, "initiated multipart upload");
        Ok(upload)
    }

    /// Store one part and return its ETag. Uploading the same part number
    /// again replaces the earlier part.
    pub async fn upload_part(
        &self,
        bucket: &str,
        name: &str,
        upload_id: &str,
        part_number: u32,
        content: Bytes,
    ) -> Result<String, S3Error> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(S3Error::InvalidArgument {
                message: format!(
                    "Part number must be an integer between 1 and {MAX_PART_NUMBER}, inclusive"
                ),
            });
        }
        let etag = md5_hex(&content);
        let part = UploadedPart {
            etag: etag.clone(),
            size: content.len() as u64,
            last_modified: Utc::now(),
        };

        let (bucket_name, key, id) = (bucket.to_string(), name.to_string(), upload_id.to_string());
        self.blocking(move |kv| {
            kv.update(|tx| {
                let mut upload = require_upload(tx, &bucket_name, &key, &id)?;
                tx.put(&bucket_name, &upload_part_key(&id, part_number), &content)?;
                upload.parts.insert(part_number, part);
                tx.put(&bucket_name, &upload_key(&id), &encode(&upload)?)
            })
        })
        .await?;

        debug!(bucket, key = name, upload_id, part_number, %etag, "stored part");
        Ok(etag)
    }

    /// Assemble the listed parts, in order, into the final object.
    ///
    /// Every listed part is checked before any bytes are copied, so a bad
    /// request leaves the upload and any existing object untouched.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        name: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Object, S3Error> {
        let (bucket_name, key, id) = (bucket.to_string(), name.to_string(), upload_id.to_string());
        let etag_format = self.multipart_etag;

        let object = self
            .blocking(move |kv| {
                kv.update(|tx| {
                    let upload = require_upload(tx, &bucket_name, &key, &id)?;
                    validate_completion(&upload, &parts)?;

                    remove_object(tx, &bucket_name, &key)?;
                    let object = assemble(tx, &upload, &parts, etag_format)?;

                    tx.delete_prefix(&bucket_name, &upload_part_prefix(&id))?;
                    tx.delete(&bucket_name, &upload_key(&id))?;
                    Ok(object)
                })
            })
            .await?;

        info!(
            bucket,
            key = name,
            upload_id,
            parts = object.parts.len(),
            size = object.length,
            "completed multipart upload"
        );
        self.emit(EventName::ObjectCreatedCompleteMultipartUpload, bucket, &object);
        Ok(object)
    }

    /// Discard an upload and all of its parts.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        name: &str,
        upload_id: &str,
    ) -> Result<(), S3Error> {
        let (bucket_name, key, id) = (bucket.to_string(), name.to_string(), upload_id.to_string());
        self.blocking(move |kv| {
            kv.update(|tx| {
                require_upload(tx, &bucket_name, &key, &id)?;
                tx.delete_prefix(&bucket_name, &upload_part_prefix(&id))?;
                tx.delete(&bucket_name, &upload_key(&id))?;
                Ok(())
            })
        })
        .await?;
        info!(bucket, key = name, upload_id, "aborted multipart upload");
        Ok(())
    }

    /// The upload record; its `parts` map is ordered by part number.
    pub async fn list_parts(
        &self,
        bucket: &str,
        name: &str,
        upload_id: &str,
    ) -> Result<MultipartUpload, S3Error> {
        let (bucket_name, key, id) = (bucket.to_string(), name.to_string(), upload_id.to_string());
        self.blocking(move |kv| kv.view(|tx| require_upload(tx, &bucket_name, &key, &id)))
            .await
    }

    /// Pending uploads in a bucket, ordered by key then initiation time.
    pub async fn list_multipart_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<MultipartUpload>, S3Error> {
        let bucket = bucket.to_string();
        let mut uploads = self
            .blocking(move |kv| {
                kv.view(|tx| {
                    require_bucket(tx, &bucket)?;
                    let mut uploads = Vec::new();
                    tx.scan_prefix(&bucket, UPLOAD_PREFIX, |k, v| {
                        // Part keys share the prefix; records have no further separator.
                        if !k[UPLOAD_PREFIX.len()..].contains(&b'\x01') {
                            uploads.push(serde_json::from_slice::<MultipartUpload>(v)?);
                        }
                        Ok(true)
                    })?;
                    Ok(uploads)
                })
            })
            .await?;
        uploads.sort_by(|a, b| a.name.cmp(&b.name).then(a.initiated.cmp(&b.initiated)));
        Ok(uploads)
    }
}

/// `hex(md5(bucket \x02 name \x02 timestamp))`.
fn upload_id(bucket: &str, name: &str, timestamp: &str) -> String {
    md5_hex(format!("{bucket}\x02{name}\x02{timestamp}").as_bytes())
}

fn require_upload(
    tx: &impl KvRead,
    bucket: &str,
    name: &str,
    upload_id: &str,
) -> Result<MultipartUpload, S3Error> {
    require_bucket(tx, bucket)?;
    let no_such_upload = || S3Error::NoSuchUpload {
        upload_id: upload_id.to_string(),
    };
    let upload: MultipartUpload =
        load(tx, bucket, &upload_key(upload_id))?.ok_or_else(no_such_upload)?;
    if upload.name != name {
        return Err(no_such_upload());
    }
    Ok(upload)
}

fn validate_completion(upload: &MultipartUpload, parts: &[CompletedPart]) -> Result<(), S3Error> {
    if parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    for part in parts {
        let stored = upload.parts.get(&part.part_number).ok_or_else(|| S3Error::InvalidPart {
            message: format!("Part {} has not been uploaded", part.part_number),
        })?;
        if let Some(etag) = &part.etag {
            if etag.trim_matches('"') != stored.etag {
                return Err(S3Error::InvalidPart {
                    message: format!("ETag for part {} does not match", part.part_number),
                });
            }
        }
    }
    Ok(())
}

/// Copy the listed upload parts into object parts and write the descriptor.
fn assemble(
    tx: &WriteTx,
    upload: &MultipartUpload,
    parts: &[CompletedPart],
    etag_format: MultipartEtag,
) -> Result<Object, S3Error> {
    let bucket = &upload.bucket;
    let mut content_md5 = Md5::new();
    let mut digests = Md5::new();
    let mut lengths = Vec::with_capacity(parts.len());

    for (index, part) in parts.iter().enumerate() {
        let data = tx
            .get(bucket, &upload_part_key(&upload.upload_id, part.part_number))?
            .ok_or_else(|| {
                S3Error::internal(format!(
                    "upload {} is missing data for part {}",
                    upload.upload_id, part.part_number
                ))
            })?;
        content_md5.update(&data);
        digests.update(Md5::digest(&data));
        lengths.push(data.len() as u64);
        tx.put(bucket, &part_key(&upload.name, index as u32), &data)?;
    }

    let etag = match etag_format {
        MultipartEtag::Plain => hex::encode(content_md5.finalize()),
        MultipartEtag::Composite => {
            format!("{}-{}", hex::encode(digests.finalize()), parts.len())
        }
    };
    let object = Object::new(&upload.name, upload.metadata.clone(), etag, lengths);
    tx.put(bucket, &meta_key(&object.name), &encode(&object)?)?;
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::events::{ChannelSink, NotificationSink, NullSink};
    use crate::storage::kv::KvStore;
    use std::io::Read;
    use std::sync::Arc;

    fn store_with(etag: MultipartEtag, events: Arc<dyn NotificationSink>) -> ObjectStore {
        let config = StorageConfig {
            multipart_etag: etag,
            ..StorageConfig::default()
        };
        ObjectStore::new(KvStore::in_memory().unwrap(), "us-east-1", &config, events)
    }

    async fn setup() -> ObjectStore {
        let s = store_with(MultipartEtag::Plain, Arc::new(NullSink));
        s.create_bucket("bkt").await.unwrap();
        s
    }

    fn part(n: u32) -> CompletedPart {
        CompletedPart {
            part_number: n,
            etag: None,
        }
    }

    async fn read(store: &ObjectStore, name: &str) -> Vec<u8> {
        let mut reader = store.get_object("bkt", name, None).await.unwrap().reader;
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        })
        .await
        .unwrap()
    }

    fn key_count(store: &ObjectStore) -> usize {
        store
            .kv()
            .view(|tx| {
                let mut n = 0;
                tx.scan_prefix("bkt", b"", |_, _| {
                    n += 1;
                    Ok(true)
                })?;
                Ok(n)
            })
            .unwrap()
    }

    #[test]
    fn test_upload_id_is_md5_of_components() {
        let id = upload_id("b", "k", "2026-02-22T12:00:00Z");
        assert_eq!(id, md5_hex(b"b\x02k\x022026-02-22T12:00:00Z"));
        assert_eq!(id.len(), 32);
    }

    #[tokio::test]
    async fn test_multipart_assembly() {
        let s = setup().await;
        let up = s.create_multipart_upload("bkt", "big", BTreeMap::new()).await.unwrap();
        let e1 = s
            .upload_part("bkt", "big", &up.upload_id, 1, Bytes::from_static(b"AAAA"))
            .await
            .unwrap();
        s.upload_part("bkt", "big", &up.upload_id, 2, Bytes::from_static(b"BBBB")).await.unwrap();
        assert_eq!(e1, md5_hex(b"AAAA"));

        let obj = s
            .complete_multipart_upload("bkt", "big", &up.upload_id, vec![part(1), part(2)])
            .await
            .unwrap();
        assert_eq!(obj.etag, md5_hex(b"AAAABBBB"));
        assert_eq!(obj.length, 8);
        assert_eq!(read(&s, "big").await, b"AAAABBBB");

        // Descriptor plus two object parts; the upload is gone.
        assert_eq!(key_count(&s), 3);
        let err = s.list_parts("bkt", "big", &up.upload_id).await.unwrap_err();
        assert_eq!(err.code(), "NoSuchUpload");
    }

    #[tokio::test]
    async fn test_composite_etag() {
        let s = store_with(MultipartEtag::Composite, Arc::new(NullSink));
        s.create_bucket("bkt").await.unwrap();
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"AAAA")).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 2, Bytes::from_static(b"BBBB")).await.unwrap();
        let obj = s
            .complete_multipart_upload("bkt", "k", &up.upload_id, vec![part(1), part(2)])
            .await
            .unwrap();

        let mut digests = Vec::new();
        digests.extend_from_slice(&Md5::digest(b"AAAA"));
        digests.extend_from_slice(&Md5::digest(b"BBBB"));
        assert_eq!(obj.etag, format!("{}-2", md5_hex(&digests)));
    }

    #[tokio::test]
    async fn test_completion_validates_first() {
        let s = setup().await;
        s.put_object("bkt", "k", BTreeMap::new(), Bytes::from_static(b"original"))
            .await
            .unwrap();
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"AAAA")).await.unwrap();

        let err = s
            .complete_multipart_upload("bkt", "k", &up.upload_id, vec![part(1), part(7)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidPart");

        // Old object intact, upload still pending.
        assert_eq!(read(&s, "k").await, b"original");
        assert_eq!(s.list_parts("bkt", "k", &up.upload_id).await.unwrap().parts.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_follows_listed_order() {
        let s = setup().await;
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"AAAA")).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 2, Bytes::from_static(b"BBBB")).await.unwrap();

        let obj = s
            .complete_multipart_upload("bkt", "k", &up.upload_id, vec![part(2), part(1)])
            .await
            .unwrap();
        assert_eq!(obj.length, 8);
        assert_eq!(obj.etag, md5_hex(b"BBBBAAAA"));
        assert_eq!(read(&s, "k").await, b"BBBBAAAA");
    }

    #[tokio::test]
    async fn test_completion_checks_etag() {
        let s = setup().await;
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"AAAA")).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 2, Bytes::from_static(b"BBBB")).await.unwrap();

        let wrong = CompletedPart {
            part_number: 1,
            etag: Some("\"0000\"".to_string()),
        };
        let err = s
            .complete_multipart_upload("bkt", "k", &up.upload_id, vec![wrong])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidPart");

        let quoted = CompletedPart {
            part_number: 1,
            etag: Some(format!("\"{}\"", md5_hex(b"AAAA"))),
        };
        let obj = s
            .complete_multipart_upload("bkt", "k", &up.upload_id, vec![quoted])
            .await
            .unwrap();
        assert_eq!(obj.length, 4);
        // Unlisted part 2 is discarded along with the upload.
        assert_eq!(key_count(&s), 2);
    }

    #[tokio::test]
    async fn test_abort_cleans_up() {
        let s = setup().await;
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        for n in 1..=3 {
            s.upload_part("bkt", "k", &up.upload_id, n, Bytes::from_static(b"data")).await.unwrap();
        }
        s.abort_multipart_upload("bkt", "k", &up.upload_id).await.unwrap();
        assert_eq!(key_count(&s), 0);

        let err = s.abort_multipart_upload("bkt", "k", &up.upload_id).await.unwrap_err();
        assert_eq!(err.code(), "NoSuchUpload");
    }

    #[tokio::test]
    async fn test_part_reupload_overwrites() {
        let s = setup().await;
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"first")).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"second")).await.unwrap();

        let listed = s.list_parts("bkt", "k", &up.upload_id).await.unwrap();
        assert_eq!(listed.parts.len(), 1);
        assert_eq!(listed.parts[&1].size, 6);

        s.complete_multipart_upload("bkt", "k", &up.upload_id, vec![part(1)])
            .await
            .unwrap();
        assert_eq!(read(&s, "k").await, b"second");
    }

    #[tokio::test]
    async fn test_unknown_upload_and_bad_part_number() {
        let s = setup().await;
        let err = s
            .upload_part("bkt", "k", "deadbeef", 1, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NoSuchUpload");

        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        for n in [0, MAX_PART_NUMBER + 1] {
            let err = s.upload_part("bkt", "k", &up.upload_id, n, Bytes::new()).await.unwrap_err();
            assert_eq!(err.code(), "InvalidArgument");
        }

        let err = s
            .upload_part("bkt", "other-key", &up.upload_id, 1, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NoSuchUpload");
    }

    #[tokio::test]
    async fn test_list_uploads_and_parts() {
        let s = setup().await;
        let b = s.create_multipart_upload("bkt", "b-key", BTreeMap::new()).await.unwrap();
        let a = s.create_multipart_upload("bkt", "a-key", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "a-key", &a.upload_id, 3, Bytes::from_static(b"ccc")).await.unwrap();
        s.upload_part("bkt", "a-key", &a.upload_id, 1, Bytes::from_static(b"a")).await.unwrap();

        let uploads = s.list_multipart_uploads("bkt").await.unwrap();
        let ids: Vec<&str> = uploads.iter().map(|u| u.upload_id.as_str()).collect();
        assert_eq!(ids, vec![a.upload_id.as_str(), b.upload_id.as_str()]);

        let parts = s.list_parts("bkt", "a-key", &a.upload_id).await.unwrap().parts;
        let numbers: Vec<u32> = parts.keys().copied().collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_metadata_carried_to_object() {
        let s = setup().await;
        let mut meta = BTreeMap::new();
        meta.insert("content-type".to_string(), "video/mp4".to_string());
        let up = s.create_multipart_upload("bkt", "v", meta.clone()).await.unwrap();
        s.upload_part("bkt", "v", &up.upload_id, 1, Bytes::from_static(b"x")).await.unwrap();
        let obj = s
            .complete_multipart_upload("bkt", "v", &up.upload_id, vec![part(1)])
            .await
            .unwrap();
        assert_eq!(obj.metadata, meta);
    }

    #[tokio::test]
    async fn test_complete_emits_event() {
        let (sink, mut rx) = ChannelSink::new(4);
        let s = store_with(MultipartEtag::Plain, Arc::new(sink));
        s.create_bucket("bkt").await.unwrap();
        let up = s.create_multipart_upload("bkt", "k", BTreeMap::new()).await.unwrap();
        s.upload_part("bkt", "k", &up.upload_id, 1, Bytes::from_static(b"x")).await.unwrap();
        s.complete_multipart_upload("bkt", "k", &up.upload_id, vec![part(1)]).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_name, EventName::ObjectCreatedCompleteMultipartUpload);
        assert_eq!(event.s3.object.key, "k");
    }
}
