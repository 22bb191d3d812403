//! Gateway webhook signature verification (hex HMAC-SHA256 of the raw
//! body, compared in constant time).

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::GatewayError;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

type HmacSha256 = Hmac<Sha256>;

/// Verifies webhook bodies against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| GatewayError::Internal(format!("webhook key: {e}")))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Hex signature of `payload`, as the gateway would send it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Internal`] if the key cannot be used.
    pub fn sign(&self, payload: &[u8]) -> Result<String, GatewayError> {
        self.mac(payload).map(hex::encode)
    }

    /// Checks `signature` (hex) against `payload`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidSignature`] for a missing, malformed or wrong
    /// signature, or when no secret is configured.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), GatewayError> {
        if self.secret.is_empty() {
            return Err(GatewayError::InvalidSignature);
        }
        let provided = signature
            .map(str::trim)
            .and_then(|s| hex::decode(s).ok())
            .ok_or(GatewayError::InvalidSignature)?;
        let expected = self.mac(payload)?;
        if expected.ct_eq(&provided).into() {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }
}
