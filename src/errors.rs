//! S3-compatible error types.
//!
//! Every core operation returns [`S3Error`].  Each variant carries a
//! well-known S3 error code, an HTTP status and a coarse [`ErrorKind`].
//! The enum implements [`axum::response::IntoResponse`] so handlers can
//! return it directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Coarse failure classes shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Forbidden,
    Internal,
}

/// S3 error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum S3Error {
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    /// The specified key does not exist.
    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.")]
    NoSuchUpload { upload_id: String },

    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// Signature mismatch, or anonymous access while it is disabled.
    #[error("{message}")]
    AccessDenied { message: String },

    #[error("The AWS access key ID you provided does not exist in our records.")]
    InvalidAccessKeyId,

    /// The Authorization scheme is unknown or disabled.
    #[error("This request does not support credentials.")]
    CredentialsNotSupported,

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// A chunked body did not decode to the declared length.
    #[error("{message}")]
    IncompleteBody { message: String },

    #[error("Your key is too long")]
    KeyTooLongError,

    /// Invalid part in multipart upload.
    #[error("{message}")]
    InvalidPart { message: String },

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("The requested range is not satisfiable")]
    InvalidRange,

    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::NoSuchUpload { .. } => "NoSuchUpload",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::CredentialsNotSupported => "CredentialsNotSupported",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::IncompleteBody { .. } => "IncompleteBody",
            S3Error::KeyTooLongError => "KeyTooLongError",
            S3Error::InvalidPart { .. } => "InvalidPart",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Classify this error into one of the coarse failure classes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            S3Error::NoSuchBucket { .. }
            | S3Error::NoSuchKey { .. }
            | S3Error::NoSuchUpload { .. } => ErrorKind::NotFound,
            S3Error::BucketAlreadyExists { .. } | S3Error::BucketNotEmpty { .. } => {
                ErrorKind::Conflict
            }
            S3Error::AccessDenied { .. }
            | S3Error::InvalidAccessKeyId
            | S3Error::CredentialsNotSupported => ErrorKind::Forbidden,
            S3Error::InvalidBucketName { .. }
            | S3Error::InvalidArgument { .. }
            | S3Error::IncompleteBody { .. }
            | S3Error::KeyTooLongError
            | S3Error::InvalidPart { .. }
            | S3Error::MalformedXML
            | S3Error::InvalidRange => ErrorKind::BadRequest,
            S3Error::NotImplemented | S3Error::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// The resource named by the error, used for the `<Resource>` element.
    pub fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket { bucket }
            | S3Error::BucketAlreadyExists { bucket }
            | S3Error::BucketNotEmpty { bucket } => bucket,
            S3Error::InvalidBucketName { name } => name,
            S3Error::NoSuchKey { key } => key,
            S3Error::NoSuchUpload { upload_id } => upload_id,
            _ => "",
        }
    }

    /// Shorthand for an internal error from anything displayable.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        S3Error::InternalError(anyhow::anyhow!("{err}"))
    }
}

macro_rules! internal_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for S3Error {
                fn from(err: $ty) -> Self {
                    S3Error::internal(err)
                }
            }
        )*
    };
}

internal_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    serde_json::Error,
    tokio::task::JoinError,
);

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        if let S3Error::InternalError(err) = &self {
            tracing::error!("internal error: {err:#}");
        }

        let body = render_error(self.code(), &self.to_string(), self.resource(), &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "ObjectStore".to_string()),
            ],
            body,
        )
            .into_response()
    }
}
