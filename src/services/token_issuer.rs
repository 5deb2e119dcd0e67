//! Access tokens for direct byte transfer against the storage gateway.
//!
//! Tokens are HS256 JWTs shared with the gateway. Each one authorizes a
//! single method against a single storage id (the `aud` claim) for a short,
//! fixed TTL. Verification happens in the gateway; the test-only `verify`
//! mirrors its rules.

use crate::errors::ServiceResult;
use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
#[cfg(test)]
use {
    crate::errors::ServiceError,
    jsonwebtoken::{DecodingKey, Validation, decode},
};
use serde::{Deserialize, Serialize};
use std::fmt;

const MIN_SECRET_LEN: usize = 32;

/// The single verb a token authorizes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Put => f.write_str("PUT"),
        }
    }
}

/// Payload of an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    /// Owner the grant was issued to.
    pub sub: String,
    /// Storage id the grant is bound to.
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub method: Method,
}

/// A minted token plus the facts the response needs about it.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub token: String,
    pub method: Method,
    pub storage_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    #[cfg(test)]
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
    public_url: String,
}

impl TokenIssuer {
    /// Build an issuer. The secret must be at least 32 bytes.
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        ttl: Duration,
        public_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            bail!("token secret must be at least {} characters", MIN_SECRET_LEN);
        }
        if ttl <= Duration::zero() {
            bail!("token TTL must be positive");
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            #[cfg(test)]
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `method` on `storage_id`, issued to `subject`.
    pub fn issue(&self, method: Method, storage_id: &str, subject: &str) -> ServiceResult<AccessGrant> {
        self.issue_at(method, storage_id, subject, Utc::now())
    }

    fn issue_at(
        &self,
        method: Method,
        storage_id: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<AccessGrant> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: storage_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            method,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(AccessGrant {
            token,
            method,
            storage_id: storage_id.to_string(),
            issued_at: now,
            expires_at,
        })
    }

    /// `{public_url}/{storage_path}?token=...` for a grant.
    pub fn signed_url(&self, grant: &AccessGrant) -> String {
        format!(
            "{}/{}?token={}",
            self.public_url,
            crate::services::storage_id::storage_path(&grant.storage_id),
            grant.token
        )
    }

    /// Check a token the way the storage gateway does: signature, issuer,
    /// expiry, exact audience and method.
    #[cfg(test)]
    pub fn verify(&self, token: &str, method: Method, storage_id: &str) -> ServiceResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[storage_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|err| {
                tracing::debug!("token rejected: {}", err);
                ServiceError::NoAccess
            })?
            .claims;
        if claims.method != method {
            return Err(ServiceError::NoAccess);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-long-enough-0123456789";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, "fleet-object-store", Duration::seconds(30), "https://blobs.test/").unwrap()
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(TokenIssuer::new("short", "x", Duration::seconds(30), "http://x").is_err());
        assert!(TokenIssuer::new(SECRET, "x", Duration::zero(), "http://x").is_err());
    }

    #[test]
    fn token_is_bound_to_method_and_audience() {
        let tokens = issuer();
        let grant = tokens.issue(Method::Get, "abcd1234", "ownerA").unwrap();
        assert_eq!(grant.expires_at - grant.issued_at, Duration::seconds(30));

        let claims = tokens.verify(&grant.token, Method::Get, "abcd1234").unwrap();
        assert_eq!(claims.sub, "ownerA");
        assert_eq!(claims.aud, "abcd1234");
        assert_eq!(claims.iss, "fleet-object-store");
        assert_eq!(claims.exp - claims.iat, 30);

        assert!(matches!(
            tokens.verify(&grant.token, Method::Put, "abcd1234"),
            Err(ServiceError::NoAccess)
        ));
        assert!(matches!(
            tokens.verify(&grant.token, Method::Get, "abcd9999"),
            Err(ServiceError::NoAccess)
        ));
    }

    #[test]
    fn expired_and_foreign_tokens_fail() {
        let tokens = issuer();
        let old = tokens
            .issue_at(Method::Get, "abcd", "ownerA", Utc::now() - Duration::minutes(5))
            .unwrap();
        assert!(tokens.verify(&old.token, Method::Get, "abcd").is_err());

        let other = TokenIssuer::new(
            "another-secret-that-is-long-enough-987654",
            "fleet-object-store",
            Duration::seconds(30),
            "https://blobs.test",
        )
        .unwrap();
        let forged = other.issue(Method::Put, "abcd", "ownerA").unwrap();
        assert!(tokens.verify(&forged.token, Method::Put, "abcd").is_err());
    }

    #[test]
    fn signed_url_uses_sharded_path() {
        let tokens = issuer();
        let grant = tokens.issue(Method::Put, "abcdef", "ownerA").unwrap();
        let url = tokens.signed_url(&grant);
        assert!(url.starts_with("https://blobs.test/ab/cd/abcdef?token="));
        assert!(url.ends_with(&grant.token));
    }
}
