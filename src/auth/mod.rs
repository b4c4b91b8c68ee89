//! Request authentication.
//!
//! [`CredentialResolver::authenticate`] turns a request into a
//! [`Credential`]. It never fails: a missing or bad signature comes back as
//! [`Credential::Denied`] carrying the reason, and the caller decides what
//! to do with it. Verification is a pure function of the request and the
//! user directory; no clock, disk or network access is involved.

pub mod sigv2;
pub mod sigv4;
pub mod user;

use std::sync::Arc;

use http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::arn::Arn;
use crate::config::AuthConfig;
use crate::errors::S3Error;

pub use user::{ConfigUserDirectory, User, UserDirectory};

/// The parts of an HTTP request that go into a signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    /// Path as received, before percent-decoding.
    pub path: &'a str,
    /// Raw query string without the leading `?`.
    pub query: &'a str,
    /// Host the request was addressed to.
    pub host: &'a str,
    pub headers: &'a HeaderMap,
}

impl<'a> SignedRequest<'a> {
    /// Build a view over an incoming request.
    pub fn from_parts(
        method: &'a http::Method,
        uri: &'a http::Uri,
        headers: &'a HeaderMap,
    ) -> Self {
        let host = headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or("");
        Self {
            method: method.as_str(),
            path: uri.path(),
            query: uri.query().unwrap_or(""),
            host,
            headers,
        }
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Why a request was not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown access key")]
    InvalidAccessKeyId,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("authorization scheme not supported")]
    CredentialsNotSupported,
    #[error("{0}")]
    AccessDenied(String),
}

impl From<AuthError> for S3Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidAccessKeyId => S3Error::InvalidAccessKeyId,
            AuthError::InvalidArgument(message) => S3Error::InvalidArgument { message },
            AuthError::CredentialsNotSupported => S3Error::CredentialsNotSupported,
            AuthError::AccessDenied(message) => S3Error::AccessDenied { message },
        }
    }
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub access_key: String,
    pub arn: Arn,
    pub is_root: bool,
}

/// Outcome of authenticating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// No Authorization header, and anonymous access is allowed.
    Anonymous,
    Authenticated(Identity),
    Denied(AuthError),
}

impl Credential {
    pub fn is_denied(&self) -> bool {
        matches!(self, Credential::Denied(_))
    }

    /// The ARN of the principal; `*` for anonymous requests.
    pub fn principal(&self) -> Option<Arn> {
        match self {
            Credential::Anonymous => Some(Arn::anonymous()),
            Credential::Authenticated(id) => Some(id.arn.clone()),
            Credential::Denied(_) => None,
        }
    }
}

/// Verifies SigV2 and SigV4 Authorization headers.
pub struct CredentialResolver {
    users: Arc<dyn UserDirectory>,
    anonymous_access: bool,
    disable_v2: bool,
    disable_v4: bool,
    debug: bool,
}

impl CredentialResolver {
    pub fn new(config: &AuthConfig, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            users,
            anonymous_access: config.anonymous_access,
            disable_v2: config.disable_v2,
            disable_v4: config.disable_v4,
            debug: config.debug,
        }
    }

    pub fn authenticate(&self, req: &SignedRequest<'_>) -> Credential {
        let Some(header) = req.header("authorization") else {
            if req.headers.contains_key(http::header::AUTHORIZATION) {
                return Credential::Denied(AuthError::InvalidArgument(
                    "Authorization header is not valid ASCII".to_string(),
                ));
            }
            return if self.anonymous_access {
                Credential::Anonymous
            } else {
                Credential::Denied(AuthError::AccessDenied(
                    "No authentication information provided".to_string(),
                ))
            };
        };

        let result = if header.starts_with(sigv4::ALGORITHM) {
            if self.disable_v4 {
                Err(AuthError::CredentialsNotSupported)
            } else {
                self.verify_v4(req, header)
            }
        } else if header.starts_with(sigv2::PREFIX) {
            if self.disable_v2 {
                Err(AuthError::CredentialsNotSupported)
            } else {
                self.verify_v2(req, header)
            }
        } else {
            Err(AuthError::CredentialsNotSupported)
        };

        match result {
            Ok(user) => Credential::Authenticated(Identity {
                access_key: user.access_key,
                arn: user.arn,
                is_root: user.is_root,
            }),
            Err(err) => {
                debug!(method = req.method, path = req.path, "authentication failed: {err}");
                Credential::Denied(err)
            }
        }
    }

    fn verify_v4(&self, req: &SignedRequest<'_>, header: &str) -> Result<User, AuthError> {
        let parsed = sigv4::parse_authorization_header(header)?;
        let user = self
            .users
            .lookup(&parsed.access_key_id)
            .ok_or(AuthError::InvalidAccessKeyId)?;

        let (expected, canonical_request) =
            sigv4::expected_signature(req, &parsed, &user.secret_key)?;
        if self.debug {
            debug!(
                access_key = %parsed.access_key_id,
                %canonical_request,
                %expected,
                provided = %parsed.signature,
                "sigv4 verification"
            );
        }

        if constant_time_eq(&expected, &parsed.signature) {
            Ok(user)
        } else {
            Err(AuthError::AccessDenied(
                "The request signature we calculated does not match the signature you provided."
                    .to_string(),
            ))
        }
    }

    fn verify_v2(&self, req: &SignedRequest<'_>, header: &str) -> Result<User, AuthError> {
        let (access_key, signature) = sigv2::parse_authorization_header(header)?;
        let user = self
            .users
            .lookup(access_key)
            .ok_or(AuthError::InvalidAccessKeyId)?;

        let string_to_sign = sigv2::string_to_sign(req);
        let expected = sigv2::compute_signature(&user.secret_key, &string_to_sign);
        if self.debug {
            debug!(
                %access_key,
                ?string_to_sign,
                %expected,
                provided = %signature,
                "sigv2 verification"
            );
        }

        if constant_time_eq(&expected, signature) {
            Ok(user)
        } else {
            Err(AuthError::AccessDenied(
                "The request signature we calculated does not match the signature you provided."
                    .to_string(),
            ))
        }
    }
}

/// Constant-time string comparison.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    const ACCESS: &str = "AKIDEXAMPLE";
    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn resolver(tweak: impl FnOnce(&mut AuthConfig)) -> CredentialResolver {
        let mut config = AuthConfig::default();
        config.users.insert(
            ACCESS.to_string(),
            UserConfig {
                access_key: ACCESS.to_string(),
                secret_key: SECRET.to_string(),
                arn: "arn:aws:iam::123456789012:user/example".parse().unwrap(),
            },
        );
        tweak(&mut config);
        let users = Arc::new(ConfigUserDirectory::from_config(&config));
        CredentialResolver::new(&config, users)
    }

    fn view<'a>(
        method: &'a str,
        path: &'a str,
        query: &'a str,
        headers: &'a HeaderMap,
    ) -> SignedRequest<'a> {
        SignedRequest {
            method,
            path,
            query,
            host: "localhost:9012",
            headers,
        }
    }

    /// Sign `headers` in place with SigV4 and return them.
    fn sign_v4(
        method: &str,
        path: &str,
        query: &str,
        mut headers: HeaderMap,
        secret: &str,
    ) -> HeaderMap {
        headers.insert("x-amz-date", "20260222T120000Z".parse().unwrap());
        headers.insert("x-amz-content-sha256", sigv4::UNSIGNED_PAYLOAD.parse().unwrap());
        let signed = "host;x-amz-content-sha256;x-amz-date";
        let parsed = sigv4::ParsedAuthorization {
            access_key_id: ACCESS.to_string(),
            date_stamp: "20260222".to_string(),
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            signed_headers: signed.to_string(),
            signature: String::new(),
            credential_scope: "20260222/us-east-1/s3/aws4_request".to_string(),
        };
        let request = view(method, path, query, &headers);
        let (sig, _) = sigv4::expected_signature(&request, &parsed, secret).unwrap();
        let auth = format!(
            "AWS4-HMAC-SHA256 Credential={ACCESS}/20260222/us-east-1/s3/aws4_request, SignedHeaders={signed}, Signature={sig}"
        );
        headers.insert("authorization", auth.parse().unwrap());
        headers
    }

    fn sign_v2(method: &str, path: &str, mut headers: HeaderMap, secret: &str) -> HeaderMap {
        headers.insert("date", "Sun, 22 Feb 2026 12:00:00 GMT".parse().unwrap());
        let sts = sigv2::string_to_sign(&view(method, path, "", &headers));
        let sig = sigv2::compute_signature(secret, &sts);
        headers.insert("authorization", format!("AWS {ACCESS}:{sig}").parse().unwrap());
        headers
    }

    // ── Missing header ──────────────────────────────────────────────

    #[test]
    fn test_missing_header_denied_by_default() {
        let headers = HeaderMap::new();
        let cred = resolver(|_| {}).authenticate(&view("GET", "/", "", &headers));
        assert!(matches!(cred, Credential::Denied(AuthError::AccessDenied(_))));
    }

    #[test]
    fn test_missing_header_anonymous_when_enabled() {
        let headers = HeaderMap::new();
        let cred =
            resolver(|c| c.anonymous_access = true).authenticate(&view("GET", "/", "", &headers));
        assert_eq!(cred, Credential::Anonymous);
        assert!(cred.principal().unwrap().is_anonymous());
    }

    #[test]
    fn test_unknown_scheme_not_supported() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        let cred = resolver(|_| {}).authenticate(&view("GET", "/", "", &headers));
        assert_eq!(cred, Credential::Denied(AuthError::CredentialsNotSupported));
    }

    // ── SigV4 ───────────────────────────────────────────────────────

    #[test]
    fn test_v4_valid_signature() {
        let headers = sign_v4("GET", "/bucket/key", "prefix=a+b", HeaderMap::new(), SECRET);
        let request = view("GET", "/bucket/key", "prefix=a+b", &headers);
        let cred = resolver(|_| {}).authenticate(&request);
        let Credential::Authenticated(id) = cred else {
            panic!("expected authenticated, got {cred:?}");
        };
        assert_eq!(id.access_key, ACCESS);
        assert_eq!(id.arn.resource, "user/example");
        assert!(!id.is_root);
    }

    #[test]
    fn test_v4_wrong_secret_denied() {
        let headers = sign_v4("GET", "/bucket/key", "", HeaderMap::new(), "not-the-secret");
        let cred = resolver(|_| {}).authenticate(&view("GET", "/bucket/key", "", &headers));
        assert!(matches!(cred, Credential::Denied(AuthError::AccessDenied(_))));
    }

    #[test]
    fn test_v4_tampered_path_denied() {
        let headers = sign_v4("GET", "/bucket/key", "", HeaderMap::new(), SECRET);
        let cred = resolver(|_| {}).authenticate(&view("GET", "/bucket/other", "", &headers));
        assert!(cred.is_denied());
    }

    #[test]
    fn test_v4_unknown_access_key() {
        let headers = sign_v4("GET", "/b", "", HeaderMap::new(), SECRET);
        let cred = resolver(|c| c.users.clear()).authenticate(&view("GET", "/b", "", &headers));
        assert_eq!(cred, Credential::Denied(AuthError::InvalidAccessKeyId));
    }

    #[test]
    fn test_v4_malformed_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "AWS4-HMAC-SHA256 Credential=broken".parse().unwrap());
        let cred = resolver(|_| {}).authenticate(&view("GET", "/b", "", &headers));
        assert!(matches!(cred, Credential::Denied(AuthError::InvalidArgument(_))));
    }

    #[test]
    fn test_v4_disabled() {
        let headers = sign_v4("GET", "/b", "", HeaderMap::new(), SECRET);
        let cred = resolver(|c| c.disable_v4 = true).authenticate(&view("GET", "/b", "", &headers));
        assert_eq!(cred, Credential::Denied(AuthError::CredentialsNotSupported));
    }

    #[test]
    fn test_authenticate_is_deterministic() {
        let headers = sign_v4("PUT", "/b/k", "", HeaderMap::new(), SECRET);
        let r = resolver(|_| {});
        let first = r.authenticate(&view("PUT", "/b/k", "", &headers));
        let second = r.authenticate(&view("PUT", "/b/k", "", &headers));
        assert_eq!(first, second);
    }

    // ── SigV2 ───────────────────────────────────────────────────────

    #[test]
    fn test_v2_valid_signature() {
        let headers = sign_v2("PUT", "/bucket/key", HeaderMap::new(), SECRET);
        let cred = resolver(|_| {}).authenticate(&view("PUT", "/bucket/key", "", &headers));
        assert!(matches!(cred, Credential::Authenticated(_)));
    }

    #[test]
    fn test_v2_wrong_secret_denied() {
        let headers = sign_v2("PUT", "/bucket/key", HeaderMap::new(), "nope");
        let cred = resolver(|_| {}).authenticate(&view("PUT", "/bucket/key", "", &headers));
        assert!(matches!(cred, Credential::Denied(AuthError::AccessDenied(_))));
    }

    #[test]
    fn test_v2_disabled() {
        let headers = sign_v2("GET", "/b", HeaderMap::new(), SECRET);
        let cred = resolver(|c| c.disable_v2 = true).authenticate(&view("GET", "/b", "", &headers));
        assert_eq!(cred, Credential::Denied(AuthError::CredentialsNotSupported));
    }

    #[test]
    fn test_root_user_authenticates() {
        let mut headers = HeaderMap::new();
        headers.insert("date", "Sun, 22 Feb 2026 12:00:00 GMT".parse().unwrap());
        let sts = sigv2::string_to_sign(&view("GET", "/", "", &headers));
        let sig = sigv2::compute_signature("objectstore-secret", &sts);
        headers.insert("authorization", format!("AWS objectstore:{sig}").parse().unwrap());

        let cred = resolver(|_| {}).authenticate(&view("GET", "/", "", &headers));
        let Credential::Authenticated(id) = cred else {
            panic!("expected authenticated");
        };
        assert!(id.is_root);
    }

    // ── Error mapping ───────────────────────────────────────────────

    #[test]
    fn test_auth_error_to_s3_error() {
        assert_eq!(S3Error::from(AuthError::InvalidAccessKeyId).code(), "InvalidAccessKeyId");
        assert_eq!(
            S3Error::from(AuthError::InvalidArgument("x".into())).code(),
            "InvalidArgument"
        );
        assert_eq!(
            S3Error::from(AuthError::CredentialsNotSupported).code(),
            "CredentialsNotSupported"
        );
        assert_eq!(S3Error::from(AuthError::AccessDenied("x".into())).code(), "AccessDenied");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
