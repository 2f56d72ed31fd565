//! Bearer token claims and validation.
//!
//! Tokens are minted by the external REST surface; the delivery core only
//! verifies them against the shared secret at upgrade time.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    /// Expiry, unix seconds.
    pub exp: usize,
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Mint a token for a user. The production issuer lives in the REST surface;
/// this mirrors its claim schema for tooling and tests.
pub fn generate_token(
    user_id: &str,
    username: &str,
    secret: &str,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now().timestamp() as usize + ttl_secs as usize;
    let claims = Claims {
        user_id: user_id.to_string(),
        username: username.to_string(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
