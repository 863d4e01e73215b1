//! Access keys and the bearer tokens they are exchanged for.
//!
//! Only the SHA-256 digest of an access key is stored. A login presents the
//! key, is compared in constant time, and receives an HS256 JWT. Expiry is
//! checked here rather than inside `jsonwebtoken` so the error is specific.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::db::models::{Principal, PrincipalId, Role};
use crate::error::HubError;

/// Allowed clock skew when checking `exp`.
const LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn principal_id(&self) -> Result<PrincipalId, HubError> {
        self.sub
            .parse()
            .map_err(|_| HubError::Authentication("malformed token subject".to_string()))
    }

    /// The token must describe the principal as currently stored.
    pub fn check_against(&self, principal: &Principal) -> Result<(), HubError> {
        if self.principal_id()? != principal.id || self.role != principal.role {
            return Err(HubError::Authentication(
                "token no longer matches the account; log in again".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(cfg.jwt_secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(cfg.jwt_secret.as_bytes())),
            ttl_secs: i64::try_from(cfg.token_ttl_secs).unwrap_or(i64::MAX / 2),
        }
    }

    pub fn issue(&self, principal: &Principal) -> Result<String, HubError> {
        let now = Utc::now().timestamp();
        self.sign(&Claims {
            sub: principal.id.to_string(),
            role: principal.role,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, HubError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| HubError::Authentication(format!("failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, HubError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::InvalidSignature => "token signature is invalid",
                ErrorKind::ExpiredSignature => "token expired",
                _ => "token is invalid",
            };
            HubError::Authentication(reason.to_string())
        })?;

        if data.claims.exp < Utc::now().timestamp() - LEEWAY_SECS {
            return Err(HubError::Authentication("token expired".to_string()));
        }
        Ok(data.claims)
    }
}

/// Fresh 256-bit access key, hex encoded. Shown to the admin exactly once.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time check of a presented key against a stored digest.
pub fn key_matches(presented: &str, stored_hash: &str) -> bool {
    let candidate = hash_key(presented);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
