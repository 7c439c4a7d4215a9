//! Fingerprint to storage key mapping.
//!
//! The mapping is a persisted layout: every stored object lives under the key
//! computed here, so changing it orphans existing objects.

use crate::errors::{UploadError, UploadResult};

/// Derives a backend storage key from a fingerprint.
pub trait NameMapper: Send + Sync {
    fn storage_key(&self, fingerprint: &str) -> UploadResult<String>;
}

impl<F> NameMapper for F
where
    F: Fn(&str) -> UploadResult<String> + Send + Sync,
{
    fn storage_key(&self, fingerprint: &str) -> UploadResult<String> {
        self(fingerprint)
    }
}

/// Splits a fingerprint into `<prefix>/<rest>` to spread keys across the
/// backend's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixNameMapper {
    pub prefix_len: usize,
    pub fingerprint_len: usize,
}

impl PrefixNameMapper {
    pub fn new(prefix_len: usize, fingerprint_len: usize) -> Self {
        Self {
            prefix_len,
            fingerprint_len,
        }
    }
}

impl Default for PrefixNameMapper {
    fn default() -> Self {
        Self::new(2, 32)
    }
}

impl NameMapper for PrefixNameMapper {
    fn storage_key(&self, fingerprint: &str) -> UploadResult<String> {
        ensure_fingerprint(fingerprint, self.fingerprint_len)?;
        let (prefix, rest) = fingerprint.split_at(self.prefix_len.min(fingerprint.len()));
        if prefix.is_empty() || rest.is_empty() {
            return Ok(fingerprint.to_string());
        }
        Ok(format!("{}/{}", prefix, rest))
    }
}

/// Require exactly `len` lowercase hex digits.
pub fn ensure_fingerprint(fingerprint: &str, len: usize) -> UploadResult<()> {
    let well_formed = fingerprint.len() == len
        && fingerprint
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if well_formed {
        Ok(())
    } else {
        Err(UploadError::InvalidFingerprint(fingerprint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    #[test]
    fn default_layout_uses_two_char_prefix() {
        let key = PrefixNameMapper::default().storage_key(FP).unwrap();
        assert_eq!(key, "5e/b63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn mapping_is_stable() {
        let mapper = PrefixNameMapper::new(4, 32);
        assert_eq!(mapper.storage_key(FP).unwrap(), mapper.storage_key(FP).unwrap());
        assert!(mapper.storage_key(FP).unwrap().starts_with("5eb6/"));
    }

    #[test]
    fn rejects_malformed_fingerprints() {
        let mapper = PrefixNameMapper::default();
        for bad in ["", "5eb63b", "5EB63BBBE01EEED093CB22BB8F5ACDC3", "../63bbbe01eeed093cb22bb8f5acdc3"] {
            assert!(matches!(
                mapper.storage_key(bad),
                Err(UploadError::InvalidFingerprint(_))
            ));
        }
    }

    #[test]
    fn closures_are_mappers() {
        let flat = |fp: &str| -> UploadResult<String> { Ok(format!("flat/{}", fp)) };
        assert_eq!(flat.storage_key("abc").unwrap(), "flat/abc");
    }
}
