//! Cache key / fingerprint derivation.

use std::convert::TryFrom;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// HTTP method, stored as a stable integer code
/// (`DELETE=0, GET=1, HEAD=2, PATCH=3, POST=4, PUT=5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Method {
    /// DELETE
    Delete,
    /// GET
    Get,
    /// HEAD
    Head,
    /// PATCH
    Patch,
    /// POST
    Post,
    /// PUT
    Put,
}

impl Method {
    /// The stable integer stored in the `method` column.
    pub fn code(self) -> i64 {
        match self {
            Method::Delete => 0,
            Method::Get => 1,
            Method::Head => 2,
            Method::Patch => 3,
            Method::Post => 4,
            Method::Put => 5,
        }
    }

    /// The canonical name used when deriving a fingerprint
    /// (`<canonical-method-name> + <url>`).
    pub fn canonical_name(self) -> &'static str {
        match self {
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

impl TryFrom<i64> for Method {
    type Error = CacheError;

    fn try_from(value: i64) -> Result<Self> {
        Ok(match value {
            0 => Method::Delete,
            1 => Method::Get,
            2 => Method::Head,
            3 => Method::Patch,
            4 => Method::Post,
            5 => Method::Put,
            other => {
                return Err(CacheError::illegal_argument(format!(
                    "unknown method code {other}"
                )))
            }
        })
    }
}

impl std::str::FromStr for Method {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "DELETE" => Method::Delete,
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "PATCH" => Method::Patch,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            other => {
                return Err(CacheError::illegal_argument(format!(
                    "unknown method {other}"
                )))
            }
        })
    }
}

/// A deterministic, filename-safe fingerprint derived from `(method, url)`.
///
/// Equal `(method, url)` pairs always produce an equal fingerprint;
/// distinct pairs should almost never collide. The caller
/// is responsible for any URL normalization; this type performs none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for `(method, url)`. `url` is used verbatim,
    /// not re-normalized.
    pub fn derive(method: Method, url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.canonical_name().as_bytes());
        hasher.update(url.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// The stable string form, also used as the `cache_key` column value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The filename of the body file for this entry: `<fingerprint>.data`.
    pub fn body_file_name(&self) -> String {
        format!("{}.data", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_method_and_url_produce_same_fingerprint() {
        let a = Fingerprint::derive(Method::Get, "http://h/x");
        let b = Fingerprint::derive(Method::Get, "http://h/x");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_produce_distinct_fingerprints() {
        let a = Fingerprint::derive(Method::Get, "http://h/x");
        let b = Fingerprint::derive(Method::Post, "http://h/x");
        let c = Fingerprint::derive(Method::Get, "http://h/y");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_is_lowercase_hex_of_fixed_length() {
        let fp = Fingerprint::derive(Method::Get, "http://h/x");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()
            && (c.is_ascii_digit() || c.is_ascii_lowercase())));
    }

    #[test]
    fn body_file_name_is_fingerprint_plus_dot_data() {
        let fp = Fingerprint::derive(Method::Get, "http://h/x");
        assert_eq!(fp.body_file_name(), format!("{}.data", fp.as_str()));
    }

    #[test]
    fn method_code_round_trips() {
        for m in [
            Method::Delete,
            Method::Get,
            Method::Head,
            Method::Patch,
            Method::Post,
            Method::Put,
        ] {
            assert_eq!(Method::try_from(m.code()).unwrap(), m);
        }
    }

    #[test]
    fn unknown_method_code_is_illegal_argument() {
        assert!(matches!(
            Method::try_from(99),
            Err(CacheError::IllegalArgument(_))
        ));
    }
}
