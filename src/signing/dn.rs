//! Distinguished names in their textual `CN=...,O=...` form.

use std::fmt;
use std::str::FromStr;

use openssl::asn1::Asn1Type;
use openssl::x509::{X509Name, X509NameBuilder};

use crate::commons::{Error, KeyServerResult};
use crate::constants::SUBJECT_ATTRIBUTE;


//------------ DistinguishedName ---------------------------------------------

/// An ordered list of attribute/value pairs naming an issuer or subject.
///
/// Values may be empty. Commas and backslashes inside a value are escaped
/// with a backslash in the textual form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DistinguishedName {
    entries: Vec<(String, String)>,
}

impl DistinguishedName {
    /// Creates the name `CN=<value>`.
    pub fn common_name(value: &str) -> Self {
        DistinguishedName {
            entries: vec![(SUBJECT_ATTRIBUTE.to_string(), value.to_string())],
        }
    }

    /// Parses a name such as `CN=KeyServer CA,O=Example`.
    pub fn parse(s: &str) -> KeyServerResult<Self> {
        let mut entries = Vec::new();
        for part in split_unescaped(s) {
            let (attr, value) = part.split_once('=').ok_or_else(|| {
                Error::invalid_name(format!(
                    "'{}' in '{}' is not of the form attribute=value",
                    part, s
                ))
            })?;
            let attr = attr.trim();
            if attr.is_empty()
                || !attr.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(Error::invalid_name(format!(
                    "invalid attribute '{}' in '{}'", attr, s
                )));
            }
            entries.push((attr.to_string(), unescape(value.trim())));
        }

        if entries.is_empty() {
            Err(Error::invalid_name("empty name"))
        } else {
            Ok(DistinguishedName { entries })
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(a, v)| (a.as_str(), v.as_str()))
    }

    /// Converts the name into an OpenSSL name.
    ///
    /// Values other than country codes are stored as UTF8String, which is
    /// not subject to the length limits OpenSSL imposes on the usual string
    /// types. This is what allows an empty common name.
    pub fn to_x509_name(&self) -> KeyServerResult<X509Name> {
        let mut builder = X509NameBuilder::new()?;
        for (attr, value) in &self.entries {
            let res = if attr.eq_ignore_ascii_case("C") {
                builder.append_entry_by_text(attr, value)
            } else {
                builder.append_entry_by_text_with_type(
                    attr, value, Asn1Type::UTF8STRING
                )
            };
            res.map_err(|e| {
                Error::invalid_name(format!("{}={}: {}", attr, value, e))
            })?;
        }
        Ok(builder.build())
    }
}

impl FromStr for DistinguishedName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (attr, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=", attr)?;
            for c in value.chars() {
                if c == ',' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Splits at commas that are not escaped with a backslash.
fn split_unescaped(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !s[start..].trim().is_empty() || !parts.is_empty() {
        parts.push(&s[start..]);
    }
    parts
}

fn unescape(s: &str) -> String {
    let mut res = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                res.push(next);
            }
        } else {
            res.push(c);
        }
    }
    res
}


//------------ Tests ---------------------------------------------------------
