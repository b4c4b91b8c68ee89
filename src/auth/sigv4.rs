//! AWS Signature Version 4 (`AWS4-HMAC-SHA256`) header authentication.
//!
//! The verification steps are:
//! 1. Parse the Authorization header into credential scope, signed headers
//!    and the provided signature
//! 2. Build the canonical request
//! 3. Build the string-to-sign
//! 4. Derive the scoped signing key via the HMAC chain
//! 5. Compute the signature and compare it with the provided one

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{AuthError, SignedRequest};

type HmacSha256 = Hmac<Sha256>;

/// Algorithm name, also the Authorization header prefix.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Payload hash used when the client did not send `x-amz-content-sha256`.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

// ── Parsed types ────────────────────────────────────────────────────

/// Parsed components of an `AWS4-HMAC-SHA256` Authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    pub access_key_id: String,
    /// The date stamp (YYYYMMDD) from the Credential field.
    pub date_stamp: String,
    pub region: String,
    pub service: String,
    /// Semicolon-separated, lowercase header names.
    pub signed_headers: String,
    /// The provided signature (64-char hex string).
    pub signature: String,
    /// `date/region/service/aws4_request`.
    pub credential_scope: String,
}

// ── Authorization header parsing ────────────────────────────────────

/// Parse the `Authorization` header value into its components.
///
/// Expected format:
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20260222/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...
/// ```
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, AuthError> {
    let rest = header
        .trim()
        .strip_prefix(ALGORITHM)
        .ok_or_else(|| malformed("Authorization header does not start with AWS4-HMAC-SHA256"))?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim());
        }
    }

    let credential =
        credential.ok_or_else(|| malformed("Missing Credential in Authorization header"))?;
    let signed_headers =
        signed_headers.ok_or_else(|| malformed("Missing SignedHeaders in Authorization header"))?;
    let signature =
        signature.ok_or_else(|| malformed("Missing Signature in Authorization header"))?;

    // AKID/YYYYMMDD/region/service/aws4_request
    let parts: Vec<&str> = credential.split('/').collect();
    let [access_key_id, date_stamp, region, service, terminator] = parts[..] else {
        return Err(malformed("Invalid Credential format in Authorization header"));
    };
    if terminator != "aws4_request" {
        return Err(malformed("Credential must end with aws4_request"));
    }
    if date_stamp.len() != 8 || !date_stamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("Credential date must be YYYYMMDD"));
    }
    if access_key_id.is_empty() || signed_headers.is_empty() || signature.is_empty() {
        return Err(malformed("Empty field in Authorization header"));
    }

    Ok(ParsedAuthorization {
        access_key_id: access_key_id.to_string(),
        date_stamp: date_stamp.to_string(),
        region: region.to_string(),
        service: service.to_string(),
        signed_headers: signed_headers.to_string(),
        signature: signature.to_string(),
        credential_scope: format!("{date_stamp}/{region}/{service}/{terminator}"),
    })
}

fn malformed(msg: &str) -> AuthError {
    AuthError::InvalidArgument(msg.to_string())
}

// ── Request-level entry point ───────────────────────────────────────

/// The signing timestamp: `x-amz-date`, falling back to `Date`.
pub fn signing_timestamp<'a>(req: &SignedRequest<'a>) -> Option<&'a str> {
    req.header("x-amz-date").or_else(|| req.header("date"))
}

/// Compute the signature the client should have sent for `req`.
///
/// Returns the canonical request alongside the hex signature so callers can
/// log it when debugging a mismatch.
pub fn expected_signature(
    req: &SignedRequest<'_>,
    parsed: &ParsedAuthorization,
    secret_key: &str,
) -> Result<(String, String), AuthError> {
    let timestamp = signing_timestamp(req)
        .ok_or_else(|| malformed("Missing x-amz-date or Date header"))?;

    // A compact ISO-8601 timestamp must fall on the credential's date.
    if is_iso8601_basic(timestamp) && timestamp[..8] != parsed.date_stamp {
        return Err(AuthError::AccessDenied(
            "Credential date does not match x-amz-date".to_string(),
        ));
    }

    let headers = canonical_headers(req, &parsed.signed_headers)?;
    let payload_hash = req.header("x-amz-content-sha256").unwrap_or(UNSIGNED_PAYLOAD);

    let canonical_request = build_canonical_request(
        req.method,
        req.path,
        req.query,
        &headers,
        &parsed.signed_headers,
        payload_hash,
    );
    let string_to_sign =
        build_string_to_sign(timestamp, &parsed.credential_scope, &canonical_request);
    let signing_key = derive_signing_key(
        secret_key,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
    );
    Ok((
        compute_signature(&signing_key, &string_to_sign),
        canonical_request,
    ))
}

fn is_iso8601_basic(ts: &str) -> bool {
    ts.len() == 16 && ts.as_bytes()[8] == b'T' && ts.ends_with('Z')
}

// ── Canonical request construction ──────────────────────────────────

/// Collect the `name:value` lines for every signed header.
///
/// `host` is taken from the request's actual host rather than the header
/// map. Repeated headers are joined with commas, each value trimmed and
/// inner whitespace collapsed.
fn canonical_headers(
    req: &SignedRequest<'_>,
    signed_headers: &str,
) -> Result<Vec<(String, String)>, AuthError> {
    let mut out = Vec::new();
    for name in signed_headers.split(';') {
        let value = if name == "host" {
            req.host.to_string()
        } else {
            let values: Vec<String> = req
                .headers
                .get_all(name)
                .iter()
                .map(|v| collapse_whitespace(&String::from_utf8_lossy(v.as_bytes())))
                .collect();
            if values.is_empty() {
                return Err(AuthError::AccessDenied(format!(
                    "Signed header {name} is missing from the request"
                )));
            }
            values.join(",")
        };
        out.push((name.to_string(), value));
    }
    Ok(out)
}

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
///
/// `headers` holds `(lowercase name, canonical value)` pairs.
pub fn build_canonical_request(
    method: &str,
    raw_path: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let canonical_uri = s3_uri_encode_path(raw_path);
    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for name in signed_headers.split(';') {
        if let Some((_, value)) = headers.iter().find(|(n, _)| n == name) {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            canonical_headers.push('\n');
        }
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

/// Build the canonical query string from the raw query string.
///
/// Each name and value is decoded (`+` meaning a space) and re-encoded with
/// S3's rules, so a space always ends up as `%20`. Pairs are sorted by name,
/// then value. Parameters without a value render as `name=`.
pub fn build_canonical_query_string(query_string: &str) -> String {
    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (
                s3_uri_encode(&query_decode(k), true),
                s3_uri_encode(&query_decode(v), true),
            )
        })
        .collect();

    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, service)
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3 URI encoding: unreserved characters (`A-Z a-z 0-9 - _ . ~`) pass
/// through, everything else becomes uppercase `%XX` per UTF-8 byte. `/` is
/// kept literally unless `encode_slash` is set.
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Canonical form of a request path: decode whatever encoding the client
/// used, then re-encode each segment.
pub fn s3_uri_encode_path(raw_path: &str) -> String {
    if raw_path.is_empty() || raw_path == "/" {
        return "/".to_string();
    }
    let encoded = s3_uri_encode(&percent_decode(raw_path), false);
    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    }
}

/// Percent-decode, leaving malformed escapes untouched.
pub(crate) fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

/// Decode a query-string component, where `+` also stands for a space.
pub(crate) fn query_decode(s: &str) -> String {
    percent_decode(&s.replace('+', " "))
}

/// Trim and collapse runs of whitespace to a single space.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ───────────────────────────────────────────────────────────
