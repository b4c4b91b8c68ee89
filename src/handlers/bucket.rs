//! Bucket-level S3 API handlers.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{iso8601, xml_response};
use crate::errors::S3Error;
use crate::metrics::record_operation;
use crate::xml;
use crate::AppState;

/// `GET /` -- ListBuckets.
pub async fn list_buckets(state: Arc<AppState>) -> Result<Response, S3Error> {
    let buckets = state.store.list_buckets().await?;

    let owner = &state.config.auth.root_user.access_key;
    let dates: Vec<String> = buckets.iter().map(|b| iso8601(b.created)).collect();
    let rows: Vec<(&str, &str)> = buckets
        .iter()
        .zip(&dates)
        .map(|(b, d)| (b.name.as_str(), d.as_str()))
        .collect();

    record_operation("ListBuckets", StatusCode::OK);
    Ok(xml_response(xml::render_list_buckets_result(owner, owner, &rows)))
}

/// `PUT /{bucket}` -- CreateBucket.
pub async fn create_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.store.create_bucket(bucket).await?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/{bucket}")) {
        response.headers_mut().insert("location", location);
    }
    record_operation("CreateBucket", StatusCode::OK);
    Ok(response)
}

/// `DELETE /{bucket}` -- DeleteBucket. The bucket must hold no objects
/// and no pending uploads.
pub async fn delete_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.store.delete_bucket(bucket).await?;
    record_operation("DeleteBucket", StatusCode::NO_CONTENT);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `HEAD /{bucket}` -- HeadBucket.
///
/// HEAD responses carry no body, so a failure is reported by status only.
pub async fn head_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    match state.store.head_bucket(bucket).await {
        Ok(_) => {
            let mut response = StatusCode::OK.into_response();
            if let Ok(region) = HeaderValue::from_str(&state.config.server.region) {
                response.headers_mut().insert("x-amz-bucket-region", region);
            }
            record_operation("HeadBucket", StatusCode::OK);
            Ok(response)
        }
        Err(err @ S3Error::InternalError(_)) => Err(err),
        Err(err) => {
            record_operation("HeadBucket", err.status_code());
            Ok(err.status_code().into_response())
        }
    }
}
