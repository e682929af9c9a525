//! The certificate authority key.

use std::fmt;
use std::path::Path;

use log::info;
use openssl::pkey::{PKey, PKeyRef, Private};

use crate::commons::{pem, KeyServerResult};
use crate::signing::dn::DistinguishedName;


//------------ CaKey ---------------------------------------------------------

/// The private key of the local certificate authority and its name.
///
/// This is loaded once at startup and then shared read-only between all
/// issuance tasks.
pub struct CaKey {
    key: PKey<Private>,
    issuer: DistinguishedName,
}

impl CaKey {
    pub fn new(key: PKey<Private>, issuer: DistinguishedName) -> Self {
        CaKey { key, issuer }
    }

    /// Loads the CA private key from a PEM file.
    pub fn load(path: &Path, issuer: &str) -> KeyServerResult<Self> {
        let issuer = DistinguishedName::parse(issuer)?;
        let key = pem::read_private_key(path)?;
        info!(
            "Loaded {} bit CA key from '{}' for issuer '{}'",
            key.bits(), path.display(), issuer
        );
        Ok(CaKey { key, issuer })
    }

    pub fn key(&self) -> &PKeyRef<Private> {
        &self.key
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }
}

impl fmt::Debug for CaKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CaKey")
            .field("issuer", &self.issuer)
            .field("bits", &self.key.bits())
            .finish()
    }
}


//------------ Tests ---------------------------------------------------------
