//! Key file loading.
//!
//! Key files hold the base64 text of a raw 32-byte Ed25519 key: the secret
//! key for signing, the public key for verification. Surrounding whitespace
//! is ignored.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mender_format::signature::compute_key_fingerprint;
use mender_format::{Ed25519Signer, Ed25519Verifier, SignatureError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid key in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: SignatureError,
    },
}

fn read_key_text(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a signing key
pub fn load_signer(path: &Path) -> Result<Ed25519Signer, KeyError> {
    let signer =
        Ed25519Signer::from_base64(&read_key_text(path)?).map_err(|source| KeyError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(
        path = %path.display(),
        fingerprint = %compute_key_fingerprint(&signer.verifying_key()),
        "loaded signing key"
    );
    Ok(signer)
}

/// Load a verification key
pub fn load_verifier(path: &Path) -> Result<Ed25519Verifier, KeyError> {
    Ed25519Verifier::from_base64(&read_key_text(path)?).map_err(|source| KeyError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_format::signature::{
        encode_signing_key, encode_verifying_key, generate_keypair,
    };
    use mender_format::{SignatureVerifier, Signer};
    use tempfile::TempDir;

    #[test]
    fn test_load_pair_signs_and_verifies() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let private = dir.path().join("private.key");
        let public = dir.path().join("public.key");
        fs::write(&private, format!("{}\n", encode_signing_key(&key))).unwrap();
        fs::write(&public, encode_verifying_key(&key.verifying_key())).unwrap();

        let signer = load_signer(&private).unwrap();
        let verifier = load_verifier(&public).unwrap();

        let signature = signer.sign(b"manifest").unwrap();
        assert!(verifier.verify(b"manifest", &signature).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_signer(&dir.path().join("absent.key")).unwrap_err();
        assert!(matches!(err, KeyError::Read { .. }));
    }

    #[test]
    fn test_garbage_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, "not a key").unwrap();
        let err = load_verifier(&path).unwrap_err();
        assert!(matches!(
            err,
            KeyError::Invalid {
                source: SignatureError::Key(_),
                ..
            }
        ));
    }
}
