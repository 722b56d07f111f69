// Credential verification trait
use crate::application::error::TrackerError;
use crate::domain::session::Identity;

pub trait CredentialVerifier: Send + Sync {
    /// Resolve an opaque token to an identity, or fail with
    /// `TrackerError::UnauthenticatedConnection`.
    fn verify(&self, token: &str) -> Result<Identity, TrackerError>;
}
