use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::Claims;
use crate::{config::JwtConfig, error::AppError};

/// Signing and verification keys, built once from config at startup.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }

    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn sign_at(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<String> {
        let exp = now + self.ttl;
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, exp = claims.exp, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<(Uuid, Claims), AppError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Signature, issuer and audience first, then expiry. A token is expired
    /// from the second named by `exp` onwards.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<(Uuid, Claims), AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                warn!(error = %e, "jwt rejected");
                AppError::InvalidToken
            })?
            .claims;

        let user_id = Uuid::parse_str(&claims.user_id).map_err(|_| {
            warn!(user_id = %claims.user_id, "jwt carries a malformed user id");
            AppError::InvalidToken
        })?;

        if now.unix_timestamp() >= claims.exp {
            debug!(user_id = %user_id, exp = claims.exp, "jwt expired");
            return Err(AppError::TokenExpired);
        }

        debug!(user_id = %user_id, "jwt verified");
        Ok((user_id, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64UrlUnpadded, Encoding};

    fn make_keys(secret: &str, issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
        })
    }

    #[test]
    fn sign_and_verify_token() {
        let keys = make_keys("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).expect("sign");
        let (verified, claims) = keys.verify(&token).expect("verify token");
        assert_eq!(verified, user_id);
        assert_eq!(claims.user_id, user_id.to_string());
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn verify_is_repeatable() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).unwrap();
        for _ in 0..3 {
            assert_eq!(keys.verify(&token).unwrap().0, user_id);
        }
    }

    #[test]
    fn payload_uses_user_id_field() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).unwrap();

        let payload = token.split('.').nth(1).unwrap();
        let mut buf = [0u8; 512];
        let raw = Base64UrlUnpadded::decode(payload, &mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(raw).unwrap();
        assert_eq!(json["userId"], user_id.to_string());
        assert!(json["iat"].is_i64());
        assert!(json["exp"].is_i64());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let user_id = Uuid::new_v4();
        let issued = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let token = keys.sign_at(user_id, issued).unwrap();
        let (_, claims) = keys.verify_at(&token, issued).unwrap();
        let exp = OffsetDateTime::from_unix_timestamp(claims.exp).unwrap();
        assert_eq!(exp, issued + Duration::minutes(5));

        let before = exp - Duration::seconds(1);
        assert_eq!(keys.verify_at(&token, before).unwrap().0, user_id);

        assert!(matches!(keys.verify_at(&token, exp), Err(AppError::TokenExpired)));
        assert!(matches!(
            keys.verify_at(&token, exp + Duration::hours(1)),
            Err(AppError::TokenExpired)
        ));
    }

    #[test]
    fn flipping_any_signature_bit_invalidates() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let token = keys.sign(Uuid::new_v4()).unwrap();
        let (signed_part, sig_b64) = token.rsplit_once('.').unwrap();

        let mut sig_buf = [0u8; 64];
        let sig = Base64UrlUnpadded::decode(sig_b64, &mut sig_buf).unwrap().to_vec();
        assert_eq!(sig.len(), 32);

        for bit in 0..sig.len() * 8 {
            let mut flipped = sig.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            let mut enc_buf = [0u8; 64];
            let enc = Base64UrlUnpadded::encode(&flipped, &mut enc_buf).unwrap();
            let tampered = format!("{signed_part}.{enc}");
            assert!(
                matches!(keys.verify(&tampered), Err(AppError::InvalidToken)),
                "bit {bit} flip was accepted"
            );
        }
    }

    #[test]
    fn verify_rejects_other_secret() {
        let good = make_keys("secret-a", "iss", "aud");
        let bad = make_keys("secret-b", "iss", "aud");
        let token = good.sign(Uuid::new_v4()).unwrap();
        assert!(matches!(bad.verify(&token), Err(AppError::InvalidToken)));
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = make_keys("same-secret", "good-iss", "good-aud");
        let bad = make_keys("same-secret", "bad-iss", "bad-aud");
        let token = good.sign(Uuid::new_v4()).unwrap();
        assert!(matches!(bad.verify(&token), Err(AppError::InvalidToken)));
    }

    #[test]
    fn verify_rejects_garbage() {
        let keys = make_keys("dev-secret", "iss", "aud");
        assert!(matches!(keys.verify("not.a.jwt"), Err(AppError::InvalidToken)));
        assert!(matches!(keys.verify(""), Err(AppError::InvalidToken)));
    }

    #[test]
    fn verify_rejects_non_uuid_subject() {
        let keys = make_keys("dev-secret", "iss", "aud");
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            user_id: "42".into(),
            iat: now.unix_timestamp(),
            exp: (now + Duration::minutes(5)).unix_timestamp(),
            iss: "iss".into(),
            aud: "aud".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert!(matches!(keys.verify(&token), Err(AppError::InvalidToken)));
    }
}
