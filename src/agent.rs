//! Agents: identities that sign commits and authenticate requests.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{AtomicError, AtomicResult};

/// An Ed25519 identity with a subject URL.
///
/// Keys and signatures travel as standard base64.
#[derive(Clone)]
pub struct Agent {
    subject: String,
    signing_key: SigningKey,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("subject", &self.subject)
            .field("public_key", &self.public_key())
            .finish()
    }
}

impl Agent {
    /// Creates a fresh key pair. The subject is `{server_url}/agents/{public_key}`.
    pub fn generate(server_url: &str) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = STANDARD.encode(signing_key.verifying_key().to_bytes());
        Agent {
            subject: format!("{}/agents/{}", server_url.trim_end_matches('/'), public_key),
            signing_key,
        }
    }

    /// Restores an agent from its subject and base64 private key (32-byte seed).
    pub fn from_private_key(subject: impl Into<String>, private_key: &str) -> AtomicResult<Self> {
        let bytes = STANDARD
            .decode(private_key.trim())
            .map_err(|e| AtomicError::Signing(format!("private key is not valid base64: {e}")))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AtomicError::Signing(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Agent {
            subject: subject.into(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn public_key(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn private_key(&self) -> String {
        STANDARD.encode(self.signing_key.to_bytes())
    }

    /// Signs the payload, returning a base64 signature.
    pub fn sign(&self, payload: &[u8]) -> String {
        STANDARD.encode(self.signing_key.sign(payload).to_bytes())
    }

    /// Headers that authenticate a request for `subject` at `timestamp` (ms).
    pub fn auth_headers(&self, subject: &str, timestamp: i64) -> Vec<(String, String)> {
        let message = format!("{subject} {timestamp}");
        vec![
            ("x-atomic-public-key".to_string(), self.public_key()),
            ("x-atomic-signature".to_string(), self.sign(message.as_bytes())),
            ("x-atomic-timestamp".to_string(), timestamp.to_string()),
            ("x-atomic-agent".to_string(), self.subject.clone()),
        ]
    }
}

/// Checks a base64 signature against a base64 public key.
pub fn verify_signature(public_key: &str, payload: &[u8], signature: &str) -> AtomicResult<()> {
    let key_bytes = STANDARD
        .decode(public_key)
        .map_err(|e| AtomicError::Signing(format!("public key is not valid base64: {e}")))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| AtomicError::Signing("public key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| AtomicError::Signing(format!("invalid public key: {e}")))?;

    let sig_bytes = STANDARD
        .decode(signature)
        .map_err(|e| AtomicError::Signing(format!("signature is not valid base64: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| AtomicError::Signing(format!("invalid signature: {e}")))?;

    verifying_key
        .verify(payload, &signature)
        .map_err(|_| AtomicError::Signing("signature does not match".into()))
}
