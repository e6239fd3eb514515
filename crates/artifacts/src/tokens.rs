//! Download-token issuance and verification.
//!
//! A token binds an artifact id to an expiry and is signed with HMAC-SHA256
//! so a client can hold it and redeem it later without a round trip to the
//! database to check provenance. The server still looks the artifact up by
//! id on redemption; the token only proves "this id was issued by us and
//! hasn't expired".

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use cx_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// `<artifact_id>.<expires_unix>.<hex signature>`
const SEPARATOR: char = '.';

#[derive(Clone)]
pub struct DownloadTokenService {
    secret: String,
    ttl: Duration,
}

impl DownloadTokenService {
    pub fn new(secret: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn issue(&self, artifact_id: Uuid) -> String {
        let expires_at = (Utc::now() + self.ttl).timestamp();
        let payload = format!("{artifact_id}{SEPARATOR}{expires_at}");
        let sig = self.sign(&payload);
        format!("{payload}{SEPARATOR}{sig}")
    }

    /// Verify a token's signature and expiry, returning the artifact id it
    /// was issued for. Does not check that the artifact still exists — that
    /// is the caller's job, against the database.
    pub fn verify(&self, token: &str) -> Result<Uuid> {
        let mut parts = token.splitn(3, SEPARATOR);
        let (Some(id_part), Some(expiry_part), Some(sig_part)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Forbidden("malformed download token".into()));
        };

        let payload = format!("{id_part}{SEPARATOR}{expiry_part}");
        let expected_sig = self.sign(&payload);

        if expected_sig.as_bytes().ct_eq(sig_part.as_bytes()).unwrap_u8() != 1 {
            return Err(Error::Forbidden("invalid download token signature".into()));
        }

        let expires_at: i64 = expiry_part
            .parse()
            .map_err(|_| Error::Forbidden("malformed download token".into()))?;
        let expires_at = DateTime::from_timestamp(expires_at, 0)
            .ok_or_else(|| Error::Forbidden("malformed download token".into()))?;
        if Utc::now() > expires_at {
            return Err(Error::Expired("download token expired".into()));
        }

        Uuid::parse_str(id_part).map_err(|_| Error::Forbidden("malformed download token".into()))
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_token() {
        let svc = DownloadTokenService::new("test-secret", 300);
        let id = Uuid::new_v4();
        let token = svc.issue(id);
        assert_eq!(svc.verify(&token).unwrap(), id);
    }

    #[test]
    fn rejects_a_tampered_signature() {
        let svc = DownloadTokenService::new("test-secret", 300);
        let token = svc.issue(Uuid::new_v4());
        let mut tampered = token.clone();
        tampered.push('0');
        assert!(svc.verify(&tampered).is_err());
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let issuer = DownloadTokenService::new("secret-a", 300);
        let verifier = DownloadTokenService::new("secret-b", 300);
        let token = issuer.issue(Uuid::new_v4());
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_an_expired_token() {
        let svc = DownloadTokenService::new("test-secret", -1);
        let token = svc.issue(Uuid::new_v4());
        assert!(matches!(svc.verify(&token), Err(Error::Expired(_))));
    }

    #[test]
    fn rejects_malformed_input() {
        let svc = DownloadTokenService::new("test-secret", 300);
        assert!(svc.verify("not-a-token").is_err());
    }
}
