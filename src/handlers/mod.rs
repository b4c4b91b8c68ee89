//! S3 API handlers.
//!
//! The router in [`crate::server`] dispatches on method, path and query
//! parameters; each handler here performs exactly one S3 operation and
//! renders its response.

pub mod bucket;
pub mod multipart;
pub mod object;

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::chunked::{decode_chunked, DECODED_LENGTH_HEADER};
use crate::errors::S3Error;
use crate::storage::Object;

/// `200 OK` with an XML body.
pub(crate) fn xml_response(body: String) -> Response {
    (StatusCode::OK, [("content-type", "application/xml")], body).into_response()
}

/// ISO-8601 timestamp as used in XML listings.
pub(crate) fn iso8601(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ETag as it appears on the wire.
pub(crate) fn quoted(etag: &str) -> String {
    format!("\"{etag}\"")
}

/// User metadata from a request: `x-amz-meta-*` headers plus
/// `content-type`, keyed by lowercase header name.
pub(crate) fn extract_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if name.starts_with("x-amz-meta-") || name == "content-type" {
            if let Ok(value) = value.to_str() {
                meta.insert(name.to_string(), value.to_string());
            }
        }
    }
    meta
}

/// The payload to store. Bodies sent with `x-amz-decoded-content-length`
/// are aws-chunked and are decoded first.
pub(crate) fn request_payload(headers: &HeaderMap, body: Bytes) -> Result<Bytes, S3Error> {
    match headers.get(DECODED_LENGTH_HEADER) {
        None => Ok(body),
        Some(declared) => {
            let declared = declared.to_str().map_err(|_| S3Error::InvalidArgument {
                message: format!("invalid {DECODED_LENGTH_HEADER} header"),
            })?;
            Ok(Bytes::from(decode_chunked(&body, declared)?))
        }
    }
}

/// Set the headers shared by GET and HEAD object responses.
pub(crate) fn set_object_headers(headers: &mut HeaderMap, object: &Object, content_length: u64) {
    if let Ok(v) = HeaderValue::from_str(&quoted(&object.etag)) {
        headers.insert("etag", v);
    }
    let modified = httpdate::fmt_http_date(object.last_modified.into());
    if let Ok(v) = HeaderValue::from_str(&modified) {
        headers.insert("last-modified", v);
    }
    headers.insert("content-length", HeaderValue::from(content_length));
    headers.insert("accept-ranges", HeaderValue::from_static("bytes"));
    for (name, value) in &object.metadata {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if object.content_type().is_none() {
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/octet-stream"),
        );
    }
}
