use jsonwebtoken::{DecodingKey, EncodingKey};
use std::path::Path;

use super::errors::TokenError;

/// RSA key pair: PKCS#8 private key signs, SPKI public key verifies.
#[derive(Clone)]
pub struct SigningKeys {
    pub(crate) encoding: EncodingKey,
    pub(crate) decoding: DecodingKey,
}

impl SigningKeys {
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, TokenError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| TokenError::Key(format!("private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::Key(format!("public key: {e}")))?;
        Ok(Self { encoding, decoding })
    }

    pub fn from_files(private_path: impl AsRef<Path>, public_path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| TokenError::Key(format!("{}: {e}", path.display())))
        };
        let private_pem = read(private_path.as_ref())?;
        let public_pem = read(public_path.as_ref())?;

        tracing::info!(
            private_key = %private_path.as_ref().display(),
            public_key = %public_path.as_ref().display(),
            "🔑 Loaded token signing keys"
        );
        Self::from_pem(&private_pem, &public_pem)
    }
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKeys(..)")
    }
}
