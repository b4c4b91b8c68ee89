//! Axum router construction and S3 route mapping.
//!
//! The [`app`] function wires every S3-compatible endpoint to its handler
//! and returns a ready-to-serve [`axum::Router`].
//!
//! S3 distinguishes operations by query parameters, not just path+method.
//! `GET /:bucket` is ListObjects, or ListMultipartUploads with `?uploads`.
//! We use a single handler per method+path that dispatches internally
//! based on query params.

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth::{Credential, SignedRequest};
use crate::errors::{generate_request_id, S3Error};
use crate::handlers::{bucket, multipart, object};
use crate::metrics::{metrics_handler, metrics_middleware, AUTH_RESULTS_TOTAL};
use crate::AppState;

/// Build the axum [`Router`] with all S3-compatible routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Infrastructure endpoints, outside the S3 API.
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Service-level: GET / -> ListBuckets
        .route("/", get(handle_get_service))
        .route(
            "/:bucket",
            get(handle_get_bucket)
                .put(handle_put_bucket)
                .delete(handle_delete_bucket)
                .head(handle_head_bucket)
                .post(handle_post_bucket),
        )
        // Wildcard key captures slashes.
        .route(
            "/:bucket/*key",
            get(handle_get_object)
                .put(handle_put_object)
                .delete(handle_delete_object)
                .head(handle_head_object)
                .post(handle_post_object),
        )
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Objects can be large; the default 2MB body limit does not apply.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-amz-request-id`, `Date` and `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses already carry the id used in their body.
    if !headers.contains_key("x-amz-request-id") {
        if let Ok(id) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-amz-request-id", id);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(date) = HeaderValue::from_str(&date) {
        headers.insert("date", date);
    }
    headers.insert("server", HeaderValue::from_static("ObjectStore"));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics"];

/// Resolves the request's credential before any handler runs.
///
/// A denied credential ends the request with the matching S3 error. Any
/// other credential is attached to the request extensions.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, S3Error> {
    let path = req.uri().path();
    if AUTH_SKIP_PATHS.iter().any(|skip| path == *skip) {
        return Ok(next.run(req).await);
    }

    let credential = state.resolver.authenticate(&SignedRequest::from_parts(
        req.method(),
        req.uri(),
        req.headers(),
    ));

    let outcome = match &credential {
        Credential::Anonymous => "anonymous",
        Credential::Authenticated(_) => "authenticated",
        Credential::Denied(_) => "denied",
    };
    counter!(AUTH_RESULTS_TOTAL, "result" => outcome).increment(1);

    if let Credential::Denied(err) = credential {
        debug!("{} {} denied: {err}", req.method(), req.uri().path());
        return Err(err.into());
    }
    req.extensions_mut().insert(credential);
    Ok(next.run(req).await)
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap. Parameters without a value
/// (`?uploads`) map to the empty string.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let decode = |s: &str| {
        percent_encoding::percent_decode_str(&s.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned()
    };
    raw.iter()
        .flat_map(|qs| qs.split('&'))
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(part), String::new()),
        })
        .collect()
}

// -- Service-level dispatch --------------------------------------------------

/// `GET /` -- ListBuckets
async fn handle_get_service(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    bucket::list_buckets(state).await
}

// -- Bucket-level dispatch ---------------------------------------------------

/// `GET /:bucket` -- `?uploads` lists multipart uploads, anything else
/// lists objects.
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploads") {
        multipart::list_multipart_uploads(state, &bucket).await
    } else {
        object::list_objects(state, &bucket, &query).await
    }
}

/// `PUT /:bucket` -- CreateBucket
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    bucket::create_bucket(state, &bucket).await
}

/// `DELETE /:bucket` -- DeleteBucket
async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    bucket::delete_bucket(state, &bucket).await
}

/// `HEAD /:bucket` -- HeadBucket
async fn handle_head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    bucket::head_bucket(state, &bucket).await
}

/// `POST /:bucket` -- no bucket-level POST operations are supported.
async fn handle_post_bucket() -> Result<Response, S3Error> {
    Err(S3Error::NotImplemented)
}

// -- Object-level dispatch ---------------------------------------------------

/// `GET /:bucket/*key` -- `?uploadId` lists parts, anything else is
/// GetObject.
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploadId") {
        multipart::list_parts(state, &bucket, &key, &query).await
    } else {
        object::get_object(state, &bucket, &key, &headers).await
    }
}

/// `PUT /:bucket/*key` -- dispatches based on query params and headers:
/// - `?partNumber=...&uploadId=...` -> UploadPart
/// - `x-amz-copy-source` header -> CopyObject
/// - default -> PutObject
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("partNumber") && query.contains_key("uploadId") {
        if headers.contains_key("x-amz-copy-source") {
            return Err(S3Error::NotImplemented);
        }
        multipart::upload_part(state, &bucket, &key, &query, &headers, body).await
    } else if headers.contains_key("x-amz-copy-source") {
        object::copy_object(state, &bucket, &key, &headers).await
    } else {
        object::put_object(state, &bucket, &key, &headers, body).await
    }
}

/// `DELETE /:bucket/*key` -- `?uploadId` aborts an upload, anything else
/// is DeleteObject.
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploadId") {
        multipart::abort_multipart_upload(state, &bucket, &key, &query).await
    } else {
        object::delete_object(state, &bucket, &key).await
    }
}

/// `HEAD /:bucket/*key` -- HeadObject
async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    object::head_object(state, &bucket, &key).await
}

/// `POST /:bucket/*key` -- dispatches based on query params:
/// - `?uploads` -> CreateMultipartUpload
/// - `?uploadId=...` -> CompleteMultipartUpload
async fn handle_post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploads") {
        multipart::create_multipart_upload(state, &bucket, &key, &headers).await
    } else if query.contains_key("uploadId") {
        multipart::complete_multipart_upload(state, &bucket, &key, &query, &body).await
    } else {
        Err(S3Error::NotImplemented)
    }
}
