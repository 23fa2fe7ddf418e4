//! Admin bearer tokens: HS256 JWTs bound to the configured issuer and
//! audience.

use crate::infra::config::AuthConfig;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub fn mint_token(
    auth: &AuthConfig,
    username: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(auth.exp_min);

    let claims = AdminClaims {
        sub: username.to_string(),
        iss: auth.issuer.clone(),
        aud: auth.audience.clone(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_ref()),
    )
}

pub fn verify_token(
    auth: &AuthConfig,
    token: &str,
) -> Result<AdminClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&auth.issuer]);
    validation.set_audience(&[&auth.audience]);

    decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_ref()),
        &validation,
    )
    .map(|data| data.claims)
}
