//! Pluggable message signing.
//!
//! Transport-level authentication usually suffices, so signing is a strategy
//! selected by configuration rather than a field sniffed at runtime: the
//! no-op signer leaves messages unsigned, the Ed25519 signer attaches a
//! detached signature any third party can verify.
//!
//! The scheme mirrors classic hash-then-sign:
//! 1. Canonicalize the envelope minus the `signature` field.
//! 2. Compute SHA-256 of the canonical bytes.
//! 3. Sign the hex-encoded hash with Ed25519.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_message_bytes;
use crate::error::BazaarError;
use crate::message::Message;

/// Strategy for signing outbound messages.
pub trait MessageSigner: Send + Sync {
    /// Produce a signature for `message`, or `None` when signing is disabled.
    fn sign(&self, message: &Message) -> Result<Option<String>, BazaarError>;
}

/// Signing disabled — messages go out unsigned (transport auth substitutes).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

impl MessageSigner for NoopSigner {
    fn sign(&self, _message: &Message) -> Result<Option<String>, BazaarError> {
        Ok(None)
    }
}

/// Ed25519 signer over the canonical envelope.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from an existing key.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The public half, for distributing to verifiers.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl MessageSigner for Ed25519Signer {
    fn sign(&self, message: &Message) -> Result<Option<String>, BazaarError> {
        let digest = message_digest(message)?;
        let signature = self.key.sign(digest.as_bytes());
        Ok(Some(hex::encode(signature.to_bytes())))
    }
}

/// Hex-encoded SHA-256 of the canonical envelope (minus `signature`).
fn message_digest(message: &Message) -> Result<String, BazaarError> {
    let bytes = canonical_message_bytes(message)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a message's detached signature against a known public key.
///
/// Fails when the message is unsigned, the signature is malformed, or the
/// signature does not match the canonical envelope under `key`.
pub fn verify_signature(message: &Message, key: &VerifyingKey) -> Result<(), BazaarError> {
    let signature_hex = message
        .signature
        .as_deref()
        .ok_or_else(|| BazaarError::Signature("message is unsigned".to_string()))?;

    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| BazaarError::Signature(format!("invalid signature hex: {e}")))?
        .as_slice()
        .try_into()
        .map_err(|_| BazaarError::Signature("invalid signature length (expected 64 bytes)".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    let digest = message_digest(message)?;
    key.verify(digest.as_bytes(), &signature)
        .map_err(|e| BazaarError::Signature(format!("signature verification failed: {e}")))
}
