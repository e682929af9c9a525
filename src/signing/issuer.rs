//! Issuing a fresh key pair and certificate for an identity.
//!
//! The [`IssuanceBackend`] trait is the seam between the server and the
//! actual cryptography. The server only ever calls it from worker threads,
//! so implementations may take as long as they like, but they must be safe
//! to call concurrently with a shared CA key.

use std::fmt;

use bytes::Bytes;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509Builder, X509Ref};

use crate::commons::{pem, KeyServerResult};
use crate::constants::{NOT_BEFORE_BACKDATE_SECS, SERIAL_NUMBER_BITS};
use crate::server::protocol;
use crate::signing::cakey::CaKey;
use crate::signing::dn::DistinguishedName;


//------------ IssueRequest --------------------------------------------------

/// Everything a backend needs to issue for one identity.
#[derive(Clone, Copy)]
pub struct IssueRequest<'a> {
    pub issuer: &'a DistinguishedName,
    pub subject: &'a DistinguishedName,
    pub ca_key: &'a PKeyRef<Private>,
}

impl<'a> IssueRequest<'a> {
    /// Creates the request for the subject `CN=<identity>`.
    pub fn new(ca: &'a CaKey, subject: &'a DistinguishedName) -> Self {
        IssueRequest {
            issuer: ca.issuer(),
            subject,
            ca_key: ca.key(),
        }
    }
}

impl fmt::Debug for IssueRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssueRequest")
            .field("issuer", &self.issuer)
            .field("subject", &self.subject)
            .finish()
    }
}


//------------ IssuanceBackend -----------------------------------------------

/// Produces a new key pair and a certificate signed by the CA.
pub trait IssuanceBackend: Send + Sync {
    fn issue(
        &self, request: &IssueRequest,
    ) -> KeyServerResult<IssuedCredentials>;
}


//------------ IssuedCredentials ---------------------------------------------

/// A private key with its certificate, plus the response sent to clients.
pub struct IssuedCredentials {
    private_key: PKey<Private>,
    certificate: X509,
    private_key_pem: Bytes,
    certificate_pem: Bytes,
    response: Bytes,
}

impl IssuedCredentials {
    pub fn new(
        private_key: PKey<Private>, certificate: X509,
    ) -> KeyServerResult<Self> {
        let private_key_pem = Bytes::from(pem::private_key_to_pem(&private_key)?);
        let certificate_pem = Bytes::from(pem::certificate_to_pem(&certificate)?);
        let response = protocol::assemble_response(
            &private_key_pem, &certificate_pem
        );
        Ok(IssuedCredentials {
            private_key,
            certificate,
            private_key_pem,
            certificate_pem,
            response,
        })
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn private_key_pem(&self) -> &Bytes {
        &self.private_key_pem
    }

    pub fn certificate_pem(&self) -> &Bytes {
        &self.certificate_pem
    }

    /// The bytes sent to every client asking for this identity.
    pub fn response(&self) -> Bytes {
        self.response.clone()
    }
}

impl fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("certificate_pem", &self.certificate_pem)
            .field("response_len", &self.response.len())
            .finish()
    }
}


//------------ OpenSslIssuer -------------------------------------------------

/// Issues RSA keys and certificates through OpenSSL.
#[derive(Clone, Debug)]
pub struct OpenSslIssuer {
    key_bits: u32,
    validity_days: u32,
}

impl OpenSslIssuer {
    pub fn new(key_bits: u32, validity_days: u32) -> Self {
        OpenSslIssuer { key_bits, validity_days }
    }

    fn generate_key(&self) -> KeyServerResult<PKey<Private>> {
        let rsa = Rsa::generate(self.key_bits)?;
        Ok(PKey::from_rsa(rsa)?)
    }

    fn build_certificate(
        &self,
        request: &IssueRequest,
        subject_key: &PKeyRef<Private>,
    ) -> KeyServerResult<X509> {
        let now = chrono::Utc::now().timestamp();
        let not_before = now - i64::from(NOT_BEFORE_BACKDATE_SECS);
        let not_after = now + i64::from(self.validity_days) * 24 * 60 * 60;

        let serial = random_serial()?.to_asn1_integer()?;
        let issuer = request.issuer.to_x509_name()?;
        let subject = request.subject.to_x509_name()?;
        let not_before = Asn1Time::from_unix(not_before as _)?;
        let not_after = Asn1Time::from_unix(not_after as _)?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_issuer_name(&issuer)?;
        builder.set_subject_name(&subject)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.set_pubkey(subject_key)?;
        builder.sign(request.ca_key, signing_digest(request.ca_key))?;
        Ok(builder.build())
    }
}

impl IssuanceBackend for OpenSslIssuer {
    fn issue(
        &self, request: &IssueRequest,
    ) -> KeyServerResult<IssuedCredentials> {
        let key = self.generate_key()?;
        let cert = self.build_certificate(request, &key)?;
        IssuedCredentials::new(key, cert)
    }
}

/// Returns a random, positive serial number.
fn random_serial() -> KeyServerResult<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    if serial.num_bits() == 0 {
        serial.add_word(1)?;
    }
    Ok(serial)
}

/// Keys that only do pure signatures must be used without a digest.
fn signing_digest(key: &PKeyRef<Private>) -> MessageDigest {
    match key.id() {
        Id::ED25519 | Id::ED448 => MessageDigest::null(),
        _ => MessageDigest::sha512(),
    }
}


//------------ Tests ---------------------------------------------------------
