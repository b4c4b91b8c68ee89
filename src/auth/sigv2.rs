//! Legacy AWS Signature Version 2 (`AWS access:signature`).
//!
//! ```text
//! Signature    = Base64(HMAC-SHA1(SecretKey, StringToSign))
//! StringToSign = Method + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Date + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::sigv4::{query_decode, s3_uri_encode_path};
use super::{AuthError, SignedRequest};

type HmacSha1 = Hmac<Sha1>;

/// Authorization header prefix.
pub const PREFIX: &str = "AWS ";

/// Query parameters that are part of the signed resource, in the order
/// they are emitted.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// Split `AWS <access key>:<signature>` into its two halves.
pub fn parse_authorization_header(header: &str) -> Result<(&str, &str), AuthError> {
    let rest = header
        .strip_prefix(PREFIX)
        .ok_or_else(|| AuthError::InvalidArgument("Authorization header is not AWS".into()))?;
    let (access_key, signature) = rest
        .trim()
        .split_once(':')
        .ok_or_else(|| AuthError::InvalidArgument("Authorization header has no signature".into()))?;
    if access_key.is_empty() || signature.is_empty() {
        return Err(AuthError::InvalidArgument(
            "Authorization header has an empty field".into(),
        ));
    }
    Ok((access_key, signature))
}

pub fn string_to_sign(req: &SignedRequest<'_>) -> String {
    let mut out = String::new();
    out.push_str(req.method);
    out.push('\n');
    out.push_str(req.header("content-md5").unwrap_or(""));
    out.push('\n');
    out.push_str(req.header("content-type").unwrap_or(""));
    out.push('\n');
    out.push_str(req.header("date").unwrap_or(""));
    out.push('\n');
    out.push_str(&canonicalized_amz_headers(req));
    out.push_str(&canonicalized_resource(req.path, req.query));
    out
}

/// Every `x-amz*` header as `name:v1,v2\n`, sorted by lowercase name.
fn canonicalized_amz_headers(req: &SignedRequest<'_>) -> String {
    let mut amz: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in req.headers {
        // HeaderName is always lowercase.
        if name.as_str().starts_with("x-amz") {
            amz.entry(name.as_str())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
    }

    let mut out = String::new();
    for (name, values) in amz {
        out.push_str(name);
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }
    out
}

/// The encoded path followed by any recognised sub-resources.
///
/// Sub-resource values are emitted decoded, `=value` only when non-empty.
/// When a parameter repeats, the first occurrence wins.
pub fn canonicalized_resource(path: &str, query: &str) -> String {
    let mut resource = s3_uri_encode_path(path);

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        params.entry(query_decode(k)).or_insert_with(|| query_decode(v));
    }

    let mut sep = '?';
    for name in SUB_RESOURCES {
        if let Some(value) = params.get(*name) {
            resource.push(sep);
            resource.push_str(name);
            if !value.is_empty() {
                resource.push('=');
                resource.push_str(value);
            }
            sep = '&';
        }
    }
    resource
}

/// Base64(HMAC-SHA1(secret, string_to_sign)).
pub fn compute_signature(secret_key: &str, string_to_sign: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
