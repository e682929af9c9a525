//! Key generation and certificate issuance.

pub mod cakey;
pub mod dn;
pub mod issuer;

pub use self::cakey::CaKey;
pub use self::dn::DistinguishedName;
pub use self::issuer::{
    IssuanceBackend, IssueRequest, IssuedCredentials, OpenSslIssuer,
};
