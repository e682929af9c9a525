//! PEM encoding and decoding of keys and certificates.

use std::fs;
use std::path::Path;

use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::{X509, X509Ref};

use crate::commons::{Error, KeyServerEmptyResult, KeyServerResult};


/// Encodes a private key as PKCS#8 PEM.
pub fn private_key_to_pem(key: &PKeyRef<Private>) -> KeyServerResult<Vec<u8>> {
    Ok(key.private_key_to_pem_pkcs8()?)
}

/// Encodes a certificate as PEM.
pub fn certificate_to_pem(cert: &X509Ref) -> KeyServerResult<Vec<u8>> {
    Ok(cert.to_pem()?)
}

/// Decodes a private key from PEM.
///
/// Accepts PKCS#8 as well as the traditional RSA and EC forms.
pub fn private_key_from_pem(pem: &[u8]) -> KeyServerResult<PKey<Private>> {
    PKey::private_key_from_pem(pem)
        .map_err(|e| Error::pem(format!("no usable private key: {}", e)))
}

/// Decodes a single certificate from PEM.
pub fn certificate_from_pem(pem: &[u8]) -> KeyServerResult<X509> {
    X509::from_pem(pem)
        .map_err(|e| Error::pem(format!("no usable certificate: {}", e)))
}

/// Reads a private key from a PEM file.
pub fn read_private_key(path: &Path) -> KeyServerResult<PKey<Private>> {
    let pem = fs::read(path).map_err(|e| Error::file(path, e))?;
    private_key_from_pem(&pem).map_err(|e| {
        Error::pem(format!("{}: {}", path.display(), e))
    })
}

/// Writes PEM data to a file, replacing any existing content.
pub fn write_pem(path: &Path, pem: &[u8]) -> KeyServerEmptyResult {
    fs::write(path, pem).map_err(|e| Error::file(path, e))
}


//------------ Tests ---------------------------------------------------------
