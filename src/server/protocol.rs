//! The wire protocol.
//!
//! A request is the identity followed by a single NUL byte. The response
//! is the PEM encoded private key immediately followed by the PEM encoded
//! certificate; the server closes the connection after writing it. A
//! failure is signalled by closing the connection without writing
//! anything.

use bytes::{BufMut, Bytes, BytesMut};

use crate::commons::{Error, KeyServerResult};
use crate::constants::{
    CERTIFICATE_PEM_HEADER, MAX_REQUEST_LEN, REQUEST_TERMINATOR,
};


//------------ Framing -------------------------------------------------------

/// The result of looking for a request in the bytes read so far.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Framing {
    /// A complete request. `consumed` includes the terminator.
    Complete { identity: String, consumed: usize },

    /// No terminator yet, keep reading.
    Incomplete,

    /// No terminator within the allowed length.
    Oversized,
}

/// Looks for a complete request at the start of `buf`.
///
/// The identity is decoded as UTF-8, replacing invalid sequences.
pub fn parse_request(buf: &[u8]) -> Framing {
    match buf.iter().position(|b| *b == REQUEST_TERMINATOR) {
        Some(pos) => Framing::Complete {
            identity: String::from_utf8_lossy(&buf[..pos]).into_owned(),
            consumed: pos + 1,
        },
        None if buf.len() > MAX_REQUEST_LEN => Framing::Oversized,
        None => Framing::Incomplete,
    }
}

/// Encodes the request for `identity`.
pub fn encode_request(identity: &str) -> Vec<u8> {
    let mut res = Vec::with_capacity(identity.len() + 1);
    res.extend_from_slice(identity.as_bytes());
    res.push(REQUEST_TERMINATOR);
    res
}


//------------ Response ------------------------------------------------------

/// Concatenates the key and certificate PEM into a response.
pub fn assemble_response(key_pem: &[u8], cert_pem: &[u8]) -> Bytes {
    let mut res = BytesMut::with_capacity(key_pem.len() + cert_pem.len());
    res.put_slice(key_pem);
    res.put_slice(cert_pem);
    res.freeze()
}

/// Splits a response into its private key and certificate parts.
///
/// The key part starts at the first PEM header and ends where the
/// certificate header starts. Anything before the first header is
/// ignored. The certificate part must contain exactly one certificate.
pub fn split_response(payload: &[u8]) -> KeyServerResult<(&[u8], &[u8])> {
    let cert_start = find(payload, CERTIFICATE_PEM_HEADER.as_bytes())
        .ok_or_else(|| Error::invalid_payload("no certificate found"))?;
    let key_start = find(payload, b"-----BEGIN")
        .filter(|start| *start < cert_start)
        .ok_or_else(|| Error::invalid_payload("no private key found"))?;

    let cert = &payload[cert_start..];
    let rest = &cert[CERTIFICATE_PEM_HEADER.len()..];
    if find(rest, CERTIFICATE_PEM_HEADER.as_bytes()).is_some() {
        return Err(Error::invalid_payload("more than one certificate"));
    }
    Ok((&payload[key_start..cert_start], cert))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}


//------------ Tests ---------------------------------------------------------
