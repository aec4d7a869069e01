use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SecurityConfig;

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Session the token was issued for
    pub sid: String,
    /// JWT ID, the key used by the blacklist
    pub jti: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// A freshly signed access token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and checks HS256 access tokens.
///
/// Expiry is checked against the caller-supplied time rather than the
/// system clock so that sessions can be driven by an injected clock.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            Duration::minutes(config.access_token_ttl_minutes),
        )
    }

    /// Access token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a new access token for `user_id` bound to `session_id`
    pub fn issue(&self, user_id: &str, session_id: &str, now: DateTime<Utc>) -> Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("Failed to generate JWT token")?;

        debug!("Issued access token {} for session {}", claims.jti, session_id);
        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at: Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(expires_at),
        })
    }

    /// Verify signature, algorithm and issuer, then expiry against `now`
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[self.issuer.as_str()]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .context("Failed to validate JWT token")?;

        if token_data.claims.exp <= now.timestamp() {
            bail!("JWT token expired");
        }

        Ok(token_data.claims)
    }
}
