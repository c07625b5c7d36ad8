//! Signature Tests
//!
//! Signature outcomes are reported next to the structural result and never
//! stop the rest of the artifact from being parsed.

mod common;

use common::{build, read, replace_once, rewrite_outer, Fixture};
use mender_format::signature::generate_keypair;
use mender_format::{
    ArtifactError, Compression, Ed25519Signer, Ed25519Verifier, ReadState, SignatureError,
    SignatureStatus,
};
use tempfile::TempDir;

fn signed_artifact(signer: &Ed25519Signer) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let mut fixture = Fixture::single("release-1", "rootfs.ext4", b"signed payload");
    fixture.compression = Compression::None;
    build(dir.path(), &fixture, Some(signer)).0
}

// =============================================================================
// Outcomes
// =============================================================================

#[test]
fn test_verified_with_matching_key() {
    let signer = Ed25519Signer::new(generate_keypair());
    let verifier = Ed25519Verifier::new(signer.verifying_key());
    let bytes = signed_artifact(&signer);

    let outcome = read(&bytes, Some(&verifier)).outcome;
    assert_eq!(outcome.signature, SignatureStatus::Verified);
    let info = outcome.into_verified().unwrap();
    assert!(info.signed);
}

#[test]
fn test_unverifiable_without_key() {
    let signer = Ed25519Signer::new(generate_keypair());
    let bytes = signed_artifact(&signer);

    let outcome = read(&bytes, None).outcome;
    assert_eq!(outcome.signature, SignatureStatus::Unverifiable);
    assert_eq!(outcome.state, ReadState::Done);
    assert!(outcome.artifact.is_ok());
    assert!(matches!(
        outcome.into_verified(),
        Err(ArtifactError::Signature(SignatureError::Unverifiable))
    ));
}

#[test]
fn test_invalid_with_other_key_still_parses() {
    let signer = Ed25519Signer::new(generate_keypair());
    let other = Ed25519Verifier::new(generate_keypair().verifying_key());
    let bytes = signed_artifact(&signer);

    let observed = read(&bytes, Some(&other));
    assert!(matches!(observed.outcome.signature, SignatureStatus::Invalid(_)));
    assert_eq!(observed.outcome.state, ReadState::Done);
    assert_eq!(observed.installed.len(), 1);

    let (info, status) = observed.outcome.into_result().unwrap();
    assert_eq!(info.artifact_name, "release-1");
    assert!(matches!(status.check(), Err(SignatureError::Invalid(_))));
}

#[test]
fn test_unsigned_with_key_is_fine() {
    let dir = TempDir::new().unwrap();
    let verifier = Ed25519Verifier::new(generate_keypair().verifying_key());
    let (bytes, _) = build(dir.path(), &Fixture::single("release-1", "rootfs.ext4", b"x"), None);

    let outcome = read(&bytes, Some(&verifier)).outcome;
    assert_eq!(outcome.signature, SignatureStatus::Unsigned);
    assert!(outcome.into_verified().is_ok());
}

#[test]
fn test_garbled_signature_is_invalid() {
    let signer = Ed25519Signer::new(generate_keypair());
    let verifier = Ed25519Verifier::new(signer.verifying_key());
    let bytes = rewrite_outer(&signed_artifact(&signer), |(path, content)| {
        if path == "manifest.sig" {
            Some((path, b"not a signature".to_vec()))
        } else {
            Some((path, content))
        }
    });

    let outcome = read(&bytes, Some(&verifier)).outcome;
    assert!(outcome.artifact.is_ok());
    assert!(matches!(outcome.signature, SignatureStatus::Invalid(_)));
}

// =============================================================================
// Precedence
// =============================================================================

#[test]
fn test_structural_error_takes_precedence() {
    let signer = Ed25519Signer::new(generate_keypair());
    let other = Ed25519Verifier::new(generate_keypair().verifying_key());
    let mut bytes = signed_artifact(&signer);
    replace_once(&mut bytes, b"signed payload", b"signed paylOad");

    let outcome = read(&bytes, Some(&other)).outcome;
    assert!(matches!(outcome.signature, SignatureStatus::Invalid(_)));
    assert!(matches!(
        outcome.into_verified(),
        Err(ArtifactError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_signature_before_manifest_rejected() {
    let signer = Ed25519Signer::new(generate_keypair());
    let mut entries = common::unpack_outer(&signed_artifact(&signer));
    entries.swap(1, 2);
    assert_eq!(entries[1].0, "manifest.sig");

    let outcome = read(&common::pack_outer(entries), None).outcome;
    assert!(matches!(outcome.artifact, Err(ArtifactError::Format(_))));
}

#[test]
fn test_v1_cannot_carry_signature() {
    let dir = TempDir::new().unwrap();
    let mut fixture = Fixture::single("release-1", "rootfs.ext4", b"x");
    fixture.version = 1;
    let (bytes, _) = build(dir.path(), &fixture, None);

    let mut entries = common::unpack_outer(&bytes);
    entries.insert(1, ("manifest.sig".to_string(), b"c2ln".to_vec()));
    let outcome = read(&common::pack_outer(entries), None).outcome;
    assert!(matches!(outcome.artifact, Err(ArtifactError::Format(_))));
    assert_eq!(outcome.signature, SignatureStatus::NotReached);
}
