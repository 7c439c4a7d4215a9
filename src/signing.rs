//! Time-limited download links.
//!
//! A presigned URL looks like
//! `<public_url>/objects/<storage key>?expires=<unix secs>&signature=<sig>`
//! followed by any caller parameters. The signature is a BLAKE3 keyed hash of
//! the storage key, the expiry and the caller parameters sorted by name, so
//! none of them can be altered without the secret.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use url::{Url, form_urlencoded};

const KEY_CONTEXT: &str = "dedup-uploader presigned object url v1";

/// Issues and checks presigned object URLs.
#[derive(Clone)]
pub struct UrlSigner {
    base: Url,
    key: [u8; 32],
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(public_url: &str, secret: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(public_url)?;
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        Ok(Self {
            base,
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        })
    }

    /// Build a URL for `key` valid until `now + ttl`.
    pub fn sign(
        &self,
        key: &str,
        ttl: Duration,
        params: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Url {
        let expires = (now + ttl).timestamp();
        let params = signed_params(params);
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("objects").extend(key.split('/'));
        }
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("expires", &expires.to_string())
                .append_pair("signature", &self.signature(key, expires, &params));
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        url
    }

    /// Check a signature produced by [`UrlSigner::sign`] and that it has not expired.
    ///
    /// `params` is the rest of the query string; `expires` and `signature`
    /// entries in it are ignored.
    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        params: &[(String, String)],
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(raw) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(raw) = <[u8; 32]>::try_from(raw.as_slice()) else {
            return false;
        };
        // blake3::Hash equality is constant time
        blake3::Hash::from(raw) == self.mac(key, expires, &signed_params(params))
    }

    fn mac(&self, key: &str, expires: i64, params: &[&(String, String)]) -> blake3::Hash {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().copied())
            .finish();
        let input = format!("{}\n{}\n{}", key, expires, encoded);
        blake3::keyed_hash(&self.key, input.as_bytes())
    }

    fn signature(&self, key: &str, expires: i64, params: &[&(String, String)]) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(key, expires, params).as_bytes())
    }
}

/// Caller parameters in the order they are signed: by name, then value.
fn signed_params(params: &[(String, String)]) -> Vec<&(String, String)> {
    let mut signed: Vec<_> = params
        .iter()
        .filter(|(name, _)| name != "expires" && name != "signature")
        .collect();
    signed.sort();
    signed
}
