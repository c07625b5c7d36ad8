//! Manifest signing and verification.
//!
//! The codec only sees two capabilities: a [`Signer`] turning manifest bytes
//! into signature bytes, and a [`SignatureVerifier`] checking them. The
//! Ed25519 implementations store signatures and keys as base64 text.

use std::fmt;

use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::SignatureError;

/// Produces a detached signature over manifest bytes
pub trait Signer {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SignatureError>;
}

/// Checks a detached signature against manifest bytes
pub trait SignatureVerifier {
    fn verify(&self, manifest: &[u8], signature: &[u8]) -> Result<(), SignatureError>;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SignatureError> {
        (**self).sign(manifest)
    }
}

impl<V: SignatureVerifier + ?Sized> SignatureVerifier for &V {
    fn verify(&self, manifest: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        (**self).verify(manifest, signature)
    }
}

/// Verifier that accepts every signature.
///
/// Used by repack, which replaces the signature anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _manifest: &[u8], _signature: &[u8]) -> Result<(), SignatureError> {
        Ok(())
    }
}

/// Ed25519 signer
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Build a signer from base64 key text
    pub fn from_base64(encoded: &str) -> Result<Self, SignatureError> {
        decode_signing_key(encoded).map(Self::new)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("fingerprint", &compute_key_fingerprint(&self.verifying_key()))
            .finish()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let signature = self.key.sign(manifest);
        Ok(base64::engine::general_purpose::STANDARD
            .encode(signature.to_bytes())
            .into_bytes())
    }
}

/// Ed25519 verifier
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Build a verifier from base64 key text
    pub fn from_base64(encoded: &str) -> Result<Self, SignatureError> {
        decode_verifying_key(encoded).map(Self::new)
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, manifest: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let text = std::str::from_utf8(signature)
            .map_err(|_| SignatureError::Encoding("signature is not base64 text".to_string()))?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| SignatureError::Encoding(e.to_string()))?;
        let signature =
            Signature::from_slice(&raw).map_err(|e| SignatureError::Encoding(e.to_string()))?;

        self.key
            .verify(manifest, &signature)
            .map_err(|e| SignatureError::Invalid(e.to_string()))
    }
}

/// Signature state of an artifact after a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The artifact carries no signature
    Unsigned,
    /// Signed, and the signature checked out
    Verified,
    /// Signed, but no verifier was supplied
    Unverifiable,
    /// Signed, and verification failed
    Invalid(String),
    /// Parsing stopped before the signature position was reached
    NotReached,
}

impl SignatureStatus {
    pub(crate) fn from_check(result: Result<(), SignatureError>) -> Self {
        match result {
            Ok(()) => Self::Verified,
            Err(SignatureError::Unverifiable) => Self::Unverifiable,
            Err(e) => Self::Invalid(e.to_string()),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Verified | Self::Unverifiable | Self::Invalid(_))
    }

    /// Convert to a result, treating everything but a good or absent signature as an error
    pub fn check(&self) -> Result<(), SignatureError> {
        match self {
            Self::Unsigned | Self::Verified | Self::NotReached => Ok(()),
            Self::Unverifiable => Err(SignatureError::Unverifiable),
            Self::Invalid(reason) => Err(SignatureError::Invalid(reason.clone())),
        }
    }

    /// Human-readable description used by `read`
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Unsigned => "no signature",
            Self::Verified => "signed and verified correctly",
            Self::Unverifiable => {
                "signed but no key for verification provided; \
                 please use `-k` option for providing verification key"
            }
            Self::Invalid(_) => "signed; verification using provided key failed",
            Self::NotReached => "not checked",
        }
    }
}

/// Compute SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Encode a signing key to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.to_bytes())
}

/// Decode a signing key from base64
pub fn decode_signing_key(encoded: &str) -> Result<SigningKey, SignatureError> {
    let bytes = decode_key_bytes(encoded)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = decode_key_bytes(encoded)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::Key(e.to_string()))
}

fn decode_key_bytes(encoded: &str) -> Result<[u8; 32], SignatureError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| SignatureError::Key(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::Key("key must be 32 bytes".to_string()))
}
