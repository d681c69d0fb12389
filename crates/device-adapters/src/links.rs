//! Time-limited download links for ad artifacts.
//!
//! `{base}/{file}?expires={unix}&signature={sig}` where `sig` is the
//! unpadded base64url HMAC-SHA256 of `{file}:{expires}`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use domains::{DomainError, LinkSigner, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct HmacLinkSigner {
    base_url: String,
    key: SecretString,
    ttl: Duration,
}

impl HmacLinkSigner {
    pub fn new(base_url: impl Into<String>, key: SecretString, ttl: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, key, ttl }
    }

    pub fn sign_at(&self, file_name: &str, now: DateTime<Utc>) -> Result<String> {
        let expires = (now + self.ttl).timestamp();
        let signature = self.signature(file_name, expires)?;
        Ok(format!("{}/{file_name}?expires={expires}&signature={signature}", self.base_url))
    }

    /// Checks a link's parameters as the file store would.
    pub fn verify(&self, file_name: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> Result<bool> {
        if now.timestamp() > expires {
            return Ok(false);
        }
        let Ok(raw) = URL_SAFE_NO_PAD.decode(signature) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(Self::message(file_name, expires).as_bytes());
        Ok(mac.verify_slice(&raw).is_ok())
    }

    fn signature(&self, file_name: &str, expires: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(Self::message(file_name, expires).as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| DomainError::Internal(format!("invalid link signing key: {e}")))
    }

    fn message(file_name: &str, expires: i64) -> String {
        format!("{file_name}:{expires}")
    }
}

impl LinkSigner for HmacLinkSigner {
    fn sign(&self, file_name: &str) -> Result<String> {
        self.sign_at(file_name, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> HmacLinkSigner {
        HmacLinkSigner::new("https://files.example/ads/", SecretString::from("s3cret".to_owned()), Duration::seconds(900))
    }

    fn query_param<'a>(link: &'a str, name: &str) -> &'a str {
        link.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
            .unwrap()
    }

    #[test]
    fn link_carries_expiry_and_signature() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let link = signer().sign_at("promo.mp4", now).unwrap();

        assert!(link.starts_with("https://files.example/ads/promo.mp4?expires="));
        let expires: i64 = query_param(&link, "expires").parse().unwrap();
        assert_eq!(expires, now.timestamp() + 900);
    }

    #[test]
    fn signature_verifies_until_expiry() {
        let signer = signer();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let link = signer.sign_at("promo.mp4", now).unwrap();
        let expires: i64 = query_param(&link, "expires").parse().unwrap();
        let signature = query_param(&link, "signature");

        assert!(signer.verify("promo.mp4", expires, signature, now).unwrap());
        assert!(!signer.verify("other.mp4", expires, signature, now).unwrap());
        assert!(!signer.verify("promo.mp4", expires, signature, now + Duration::seconds(901)).unwrap());
    }
}
