//! Realtime capability tokens.
//!
//! A token is an HS256 JWT binding {sessionId, userId} with a fixed
//! audience and issuer. The gateway only verifies; issuing belongs to the
//! platform that fronts it, but the contract lives here so both sides (and
//! tests) agree on it.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub const AUDIENCE: &str = "helios-realtime";
pub const ISSUER: &str = "helios-platform";

/// Default token lifetime in seconds.
pub const DEFAULT_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign realtime token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("invalid realtime token")]
    Invalid,
}

/// Claims embedded in a realtime token.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeClaims {
    pub session_id: String,
    pub user_id: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

/// A freshly issued token and its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mint a realtime token scoped to one session and user.
pub fn issue(
    secret: &[u8],
    session_id: &str,
    user_id: &str,
    ttl_secs: i64,
) -> Result<IssuedToken, TokenError> {
    let now = Utc::now();
    let expires_at = now + Duration::seconds(ttl_secs);
    let claims = RealtimeClaims {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        aud: AUDIENCE.to_string(),
        iss: ISSUER.to_string(),
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(TokenError::Signing)?;
    Ok(IssuedToken { token, expires_at })
}

/// Verify a token's signature, audience, issuer, and expiry.
pub fn verify(secret: &[u8], token: &str) -> Result<RealtimeClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);
    let data = jsonwebtoken::decode::<RealtimeClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &validation,
    )
    .map_err(|_| TokenError::Invalid)?;
    Ok(data.claims)
}

/// Verify a token and check it is bound to the connecting identity.
pub fn verify_for(
    secret: &[u8],
    token: &str,
    session_id: &str,
    user_id: &str,
) -> Result<RealtimeClaims, TokenError> {
    let claims = verify(secret, token)?;
    if claims.session_id != session_id || claims.user_id != user_id {
        return Err(TokenError::Invalid);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn issue_and_verify_round_trip() {
        let issued = issue(SECRET, "ses_1", "usr_1", 60).unwrap();
        let claims = verify(SECRET, &issued.token).unwrap();
        assert_eq!(claims.session_id, "ses_1");
        assert_eq!(claims.user_id, "usr_1");
        assert_eq!(claims.aud, AUDIENCE);
        assert_eq!(claims.iss, ISSUER);
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let issued = issue(SECRET, "ses_1", "usr_1", 60).unwrap();
        assert!(matches!(
            verify(b"other-secret", &issued.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn verify_rejects_expired_token() {
        let issued = issue(SECRET, "ses_1", "usr_1", -120).unwrap();
        assert!(matches!(
            verify(SECRET, &issued.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn verify_for_rejects_mismatched_identity() {
        let issued = issue(SECRET, "ses_1", "usr_1", 60).unwrap();
        assert!(verify_for(SECRET, &issued.token, "ses_1", "usr_1").is_ok());
        assert!(verify_for(SECRET, &issued.token, "ses_2", "usr_1").is_err());
        assert!(verify_for(SECRET, &issued.token, "ses_1", "usr_2").is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(matches!(
            verify(SECRET, "not-a-jwt"),
            Err(TokenError::Invalid)
        ));
    }
}
