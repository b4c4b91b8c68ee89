//! Multipart upload S3 API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use metrics::counter;

use super::{extract_metadata, iso8601, quoted, request_payload, xml_response};
use crate::errors::S3Error;
use crate::metrics::{record_operation, BYTES_RECEIVED_TOTAL};
use crate::xml::{self, PartEntry, UploadEntry};
use crate::AppState;

/// The `uploadId` query parameter.
fn upload_id(query: &HashMap<String, String>) -> Result<&str, S3Error> {
    query
        .get("uploadId")
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "uploadId must not be empty".to_string(),
        })
}

/// `POST /{bucket}/{key}?uploads` -- CreateMultipartUpload.
pub async fn create_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let upload = state
        .store
        .create_multipart_upload(bucket, key, extract_metadata(headers))
        .await?;

    record_operation("CreateMultipartUpload", StatusCode::OK);
    Ok(xml_response(xml::render_initiate_multipart_upload_result(
        bucket,
        key,
        &upload.upload_id,
    )))
}

/// `PUT /{bucket}/{key}?partNumber=N&uploadId=ID` -- UploadPart.
pub async fn upload_part(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let upload_id = upload_id(query)?;
    let part_number = query
        .get("partNumber")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "partNumber must be an integer".to_string(),
        })?;

    let content = request_payload(headers, body)?;
    counter!(BYTES_RECEIVED_TOTAL).increment(content.len() as u64);

    let etag = state
        .store
        .upload_part(bucket, key, upload_id, part_number, content)
        .await?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(v) = HeaderValue::from_str(&quoted(&etag)) {
        response.headers_mut().insert("etag", v);
    }
    record_operation("UploadPart", StatusCode::OK);
    Ok(response)
}

/// `POST /{bucket}/{key}?uploadId=ID` -- CompleteMultipartUpload.
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let upload_id = upload_id(query)?;
    let parts = xml::parse_complete_multipart_upload_xml(body)?;

    let object = state
        .store
        .complete_multipart_upload(bucket, key, upload_id, parts)
        .await?;

    record_operation("CompleteMultipartUpload", StatusCode::OK);
    Ok(xml_response(xml::render_complete_multipart_upload_result(
        &format!("/{bucket}/{key}"),
        bucket,
        key,
        &quoted(&object.etag),
    )))
}

/// `DELETE /{bucket}/{key}?uploadId=ID` -- AbortMultipartUpload.
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = upload_id(query)?;
    state
        .store
        .abort_multipart_upload(bucket, key, upload_id)
        .await?;
    record_operation("AbortMultipartUpload", StatusCode::NO_CONTENT);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?uploads` -- ListMultipartUploads.
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    bucket: &str,
) -> Result<Response, S3Error> {
    let uploads = state.store.list_multipart_uploads(bucket).await?;

    let initiated: Vec<String> = uploads.iter().map(|u| iso8601(u.initiated)).collect();
    let entries: Vec<UploadEntry<'_>> = uploads
        .iter()
        .zip(&initiated)
        .map(|(u, at)| UploadEntry {
            key: &u.name,
            upload_id: &u.upload_id,
            initiated: at,
        })
        .collect();

    record_operation("ListMultipartUploads", StatusCode::OK);
    Ok(xml_response(xml::render_list_multipart_uploads_result(
        bucket, &entries,
    )))
}

/// `GET /{bucket}/{key}?uploadId=ID` -- ListParts.
pub async fn list_parts(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = upload_id(query)?;
    let upload = state.store.list_parts(bucket, key, upload_id).await?;

    let etags: Vec<String> = upload.parts.values().map(|p| quoted(&p.etag)).collect();
    let entries: Vec<PartEntry<'_>> = upload
        .parts
        .iter()
        .zip(&etags)
        .map(|((number, part), etag)| PartEntry {
            part_number: *number,
            etag,
            size: part.size,
        })
        .collect();

    record_operation("ListParts", StatusCode::OK);
    Ok(xml_response(xml::render_list_parts_result(
        bucket, key, upload_id, &entries,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_required() {
        let mut query = HashMap::new();
        assert!(upload_id(&query).is_err());
        query.insert("uploadId".to_string(), String::new());
        assert!(upload_id(&query).is_err());
        query.insert("uploadId".to_string(), "abc".to_string());
        assert_eq!(upload_id(&query).unwrap(), "abc");
    }
}
