//! Bearer-token issuance and verification for the HTTP bridge (§6).
//!
//! The teacher has no HTTP authentication layer of its own (its controller
//! API is explicitly unauthenticated, see the warning comments in
//! `turn-server/src/api.rs`), so this is grounded in the broader pack's
//! convention for stateless API auth (`jsonwebtoken`, as seen wired into
//! comparable Axum services in this corpus) rather than the teacher
//! directly.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::NexusError;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

pub struct TokenIssuer {
    secret: String,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(secret: String, ttl_secs: u64) -> Self {
        Self { secret, ttl_secs }
    }

    pub fn issue(&self, username: &str) -> Result<String, NexusError> {
        let claims = Claims {
            sub: username.to_string(),
            exp: now_secs() + self.ttl_secs,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| NexusError::Authentication(format!("failed to issue token: {e}")))
    }

    /// Returns the username the token was issued for, or an authentication
    /// error if it's missing, malformed or expired.
    pub fn verify(&self, token: &str) -> Result<String, NexusError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| NexusError::Authentication("invalid or expired token".into()))?;

        Ok(data.claims.sub)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_username() {
        let issuer = TokenIssuer::new("test-secret".into(), 3600);
        let token = issuer.issue("alice").unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn rejects_tampered_tokens() {
        let issuer = TokenIssuer::new("test-secret".into(), 3600);
        let mut token = issuer.issue("alice").unwrap();
        token.push('x');
        assert!(issuer.verify(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let issuer = TokenIssuer::new("test-secret".into(), 0);
        let token = issuer.issue("alice").unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));
        assert!(issuer.verify(&token).is_err());
    }
}
