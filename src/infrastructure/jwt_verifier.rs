// JWT credential verification (HS256, tokens issued by the rental service)
use crate::application::credential_verifier::CredentialVerifier;
use crate::application::error::TrackerError;
use crate::domain::session::{Identity, Role};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerClaims {
    pub user_id: i64,
    pub role: Role,
    #[serde(default)]
    pub car_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub exp: usize,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, TrackerError> {
        let data = decode::<TrackerClaims>(token, &self.key, &self.validation)
            .map_err(|e| TrackerError::UnauthenticatedConnection(format!("invalid token: {}", e)))?;
        let claims = data.claims;

        Ok(Identity {
            user_id: claims.user_id,
            role: claims.role,
            bound_vehicle_id: claims.car_id,
            display_name: claims
                .username
                .unwrap_or_else(|| format!("user-{}", claims.user_id)),
        })
    }
}
