//! Object-level S3 API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use metrics::counter;
use tracing::warn;

use super::{extract_metadata, iso8601, quoted, request_payload, set_object_headers, xml_response};
use crate::errors::S3Error;
use crate::metrics::{record_operation, BYTES_RECEIVED_TOTAL, BYTES_SENT_TOTAL};
use crate::storage::reader::{content_range, parse_range_header};
use crate::storage::store::{ObjectRead, DEFAULT_MAX_KEYS};
use crate::storage::ObjectReader;
use crate::xml::{self, ObjectEntry};
use crate::AppState;

/// `PUT /{bucket}/{key}` -- PutObject.
pub async fn put_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let content = request_payload(headers, body)?;
    counter!(BYTES_RECEIVED_TOTAL).increment(content.len() as u64);

    let object = state
        .store
        .put_object(bucket, key, extract_metadata(headers), content)
        .await?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(etag) = HeaderValue::from_str(&quoted(&object.etag)) {
        response.headers_mut().insert("etag", etag);
    }
    record_operation("PutObject", StatusCode::OK);
    Ok(response)
}

/// `PUT /{bucket}/{key}` with `x-amz-copy-source` -- CopyObject.
pub async fn copy_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (src_bucket, src_key) = parse_copy_source(source)?;

    let object = state
        .store
        .copy_object(&src_bucket, &src_key, bucket, key)
        .await?;

    record_operation("CopyObject", StatusCode::OK);
    Ok(xml_response(xml::render_copy_object_result(
        &quoted(&object.etag),
        &iso8601(object.last_modified),
    )))
}

/// Split `x-amz-copy-source` (`[/]bucket/key[?versionId=..]`, percent-encoded)
/// into bucket and key.
fn parse_copy_source(source: &str) -> Result<(String, String), S3Error> {
    let source = source.split('?').next().unwrap_or_default();
    let decoded = percent_encoding::percent_decode_str(source)
        .decode_utf8()
        .map_err(|_| invalid_copy_source(source))?;
    match decoded.trim_start_matches('/').split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(invalid_copy_source(source)),
    }
}

fn invalid_copy_source(source: &str) -> S3Error {
    S3Error::InvalidArgument {
        message: format!("Invalid copy source: {source:?}"),
    }
}

/// `GET /{bucket}/{key}` -- GetObject, optionally ranged.
///
/// The body is streamed part by part; each part is fetched on the
/// blocking pool.
pub async fn get_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    // An unparseable Range header is ignored and the whole object served.
    let range = headers
        .get("range")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let ObjectRead {
        object,
        range,
        reader,
    } = state.store.get_object(bucket, key, range).await?;

    let length = reader.remaining();
    counter!(BYTES_SENT_TOTAL).increment(length);

    let status = if range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut response = (status, Body::from_stream(body_stream(reader))).into_response();
    let hdrs = response.headers_mut();
    set_object_headers(hdrs, &object, length);
    if let Some((start, end)) = range {
        if let Ok(v) = HeaderValue::from_str(&content_range(start, end, object.length)) {
            hdrs.insert("content-range", v);
        }
    }

    record_operation("GetObject", status);
    Ok(response)
}

fn body_stream(
    reader: ObjectReader,
) -> impl futures::Stream<Item = Result<Bytes, S3Error>> + Send + 'static {
    futures::stream::try_unfold(reader, |mut reader| async move {
        let (reader, chunk) = tokio::task::spawn_blocking(move || {
            let chunk = reader.next_chunk();
            (reader, chunk)
        })
        .await?;
        match chunk {
            Ok(Some(bytes)) => Ok(Some((bytes, reader))),
            Ok(None) => Ok(None),
            Err(err) => {
                warn!("object read failed mid-stream: {err}");
                Err(err)
            }
        }
    })
}

/// `HEAD /{bucket}/{key}` -- HeadObject. Failures are reported by status
/// only.
pub async fn head_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    match state.store.head_object(bucket, key).await {
        Ok(object) => {
            let mut response = StatusCode::OK.into_response();
            set_object_headers(response.headers_mut(), &object, object.length);
            record_operation("HeadObject", StatusCode::OK);
            Ok(response)
        }
        Err(err @ S3Error::InternalError(_)) => Err(err),
        Err(err) => {
            record_operation("HeadObject", err.status_code());
            Ok(err.status_code().into_response())
        }
    }
}

/// `DELETE /{bucket}/{key}` -- DeleteObject. Deleting a missing key
/// succeeds.
pub async fn delete_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    state.store.delete_object(bucket, key).await?;
    record_operation("DeleteObject", StatusCode::NO_CONTENT);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}` -- ListObjects with `prefix` and `max-keys`.
pub async fn list_objects(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let max_keys = match query.get("max-keys") {
        None => DEFAULT_MAX_KEYS,
        Some(v) => v.parse::<usize>().map_err(|_| S3Error::InvalidArgument {
            message: "max-keys must be a non-negative integer".to_string(),
        })?,
    }
    .min(DEFAULT_MAX_KEYS);

    let listing = state.store.list_objects(bucket, prefix, max_keys).await?;

    let rendered: Vec<(String, String)> = listing
        .objects
        .iter()
        .map(|o| (iso8601(o.last_modified), quoted(&o.etag)))
        .collect();
    let entries: Vec<ObjectEntry<'_>> = listing
        .objects
        .iter()
        .zip(&rendered)
        .map(|(o, (modified, etag))| ObjectEntry {
            key: &o.name,
            last_modified: modified,
            etag,
            size: o.length,
        })
        .collect();

    record_operation("ListObjects", StatusCode::OK);
    Ok(xml_response(xml::render_list_objects_result(
        bucket,
        prefix,
        max_keys,
        listing.is_truncated,
        &entries,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_source() {
        assert_eq!(
            parse_copy_source("/src/a/b.txt").unwrap(),
            ("src".to_string(), "a/b.txt".to_string())
        );
        assert_eq!(
            parse_copy_source("src/with%20space?versionId=1").unwrap(),
            ("src".to_string(), "with space".to_string())
        );
    }

    #[test]
    fn test_parse_copy_source_invalid() {
        for bad in ["", "/", "bucket-only", "/bucket/"] {
            assert_eq!(parse_copy_source(bad).unwrap_err().code(), "InvalidArgument");
        }
    }
}
