//! Decoder for `aws-chunked` request bodies.
//!
//! Clients streaming a signed upload send the body as a series of chunks:
//!
//! ```text
//! <hex length>;chunk-signature=<sig>\r\n
//! <length bytes>\r\n
//! ...
//! 0;chunk-signature=<sig>\r\n
//! ```
//!
//! and declare the decoded size in `x-amz-decoded-content-length`.
//!
//! SECURITY: chunk signatures are read and discarded without verification.
//! Only the declared decoded length is checked.

use tracing::debug;

use crate::errors::S3Error;

/// Header carrying the size of the payload after decoding.
pub const DECODED_LENGTH_HEADER: &str = "x-amz-decoded-content-length";

/// Decode a chunked payload, checking the result against `declared_len`.
pub fn decode_chunked(payload: &[u8], declared_len: &str) -> Result<Vec<u8>, S3Error> {
    let expected: usize = declared_len.trim().parse().map_err(|_| S3Error::InvalidArgument {
        message: format!("Invalid {DECODED_LENGTH_HEADER}: {declared_len:?}"),
    })?;

    // Decoded content is never longer than its encoding.
    if expected > payload.len() {
        return Err(S3Error::IncompleteBody {
            message: format!(
                "Expected {expected} bytes but the chunked body is only {} bytes",
                payload.len()
            ),
        });
    }

    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;

    loop {
        while matches!(payload.get(pos), Some(b'\r' | b'\n')) {
            pos += 1;
        }

        let line_len = payload[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| incomplete("chunk header is not terminated"))?;
        let line = &payload[pos..pos + line_len];
        pos += line_len + 1;

        // Everything after ';' is chunk metadata.
        let size_field = line.split(|&b| b == b';').next().unwrap_or(line);
        let size = std::str::from_utf8(size_field)
            .ok()
            .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
            .ok_or_else(|| incomplete("chunk length is not hexadecimal"))?;

        if size == 0 {
            break;
        }

        let data = pos
            .checked_add(size)
            .and_then(|end| payload.get(pos..end))
            .ok_or_else(|| incomplete("chunk is shorter than its declared length"))?;
        out.extend_from_slice(data);
        pos += size;
    }

    if out.len() != expected {
        return Err(S3Error::IncompleteBody {
            message: format!(
                "Expected {expected} bytes but got {} after decoding chunks",
                out.len()
            ),
        });
    }

    debug!(decoded = out.len(), encoded = payload.len(), "decoded chunked payload");
    Ok(out)
}

fn incomplete(msg: &str) -> S3Error {
    S3Error::IncompleteBody {
        message: format!("Malformed chunked payload: {msg}"),
    }
}
