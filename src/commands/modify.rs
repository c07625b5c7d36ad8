//! `modify`: edit the root filesystem inside an artifact or a bare image.
//!
//! Mounting a filesystem image is left to a [`PayloadMounter`]. This module
//! only knows which files inside the mounted tree to change.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use mender_format::{
    repack, AcceptAll, ArtifactError, ArtifactReader, BoxError, DataFile, ReadState,
    RepackOptions, RepackReport, RootfsInstaller, Signer,
};
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{open_artifact, optional_signer, scratch_dir, CommandError};
use crate::config::ToolConfig;
use crate::output::place_atomically;

/// Artifact name record, `artifact_name=<name>`
pub const ARTIFACT_INFO_PATH: &str = "etc/mender/artifact_info";
/// Client configuration, a JSON object
pub const MENDER_CONF_PATH: &str = "etc/mender/mender.conf";
pub const SERVER_CERT_PATH: &str = "etc/mender/server.crt";
pub const VERIFY_KEY_PATH: &str = "etc/mender/artifact-verify-key.pem";

/// Makes the filesystem inside an image file editable as a directory tree
pub trait PayloadMounter {
    /// Expose the filesystem in `image`, run `edit` on its root and persist
    /// the changes back into `image`
    fn with_mounted(
        &self,
        image: &Path,
        edit: &mut dyn FnMut(&Path) -> io::Result<()>,
    ) -> Result<(), BoxError>;
}

/// Changes to files inside a mounted root filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageEdits {
    pub artifact_name: Option<String>,
    pub server_uri: Option<String>,
    pub server_cert: Option<PathBuf>,
    pub verification_key: Option<PathBuf>,
    pub tenant_token: Option<String>,
}

impl ImageEdits {
    pub fn is_empty(&self) -> bool {
        self.artifact_name.is_none() && !self.touches_configuration()
    }

    /// Whether anything besides the artifact name record changes
    pub fn touches_configuration(&self) -> bool {
        self.server_uri.is_some()
            || self.server_cert.is_some()
            || self.verification_key.is_some()
            || self.tenant_token.is_some()
    }

    /// Apply the edits to the filesystem tree rooted at `root`
    pub fn apply(&self, root: &Path) -> io::Result<()> {
        if let Some(name) = &self.artifact_name {
            let path = root.join(ARTIFACT_INFO_PATH);
            create_parent(&path)?;
            fs::write(&path, format!("artifact_name={}", name))?;
        }

        let mut conf_updates = Vec::new();
        if let Some(uri) = &self.server_uri {
            conf_updates.push(("ServerURL", uri.as_str()));
        }
        if let Some(token) = &self.tenant_token {
            conf_updates.push(("TenantToken", token.as_str()));
        }
        if !conf_updates.is_empty() {
            update_mender_conf(&root.join(MENDER_CONF_PATH), &conf_updates)?;
        }

        if let Some(cert) = &self.server_cert {
            replace_file(cert, &root.join(SERVER_CERT_PATH))?;
        }
        if let Some(key) = &self.verification_key {
            replace_file(key, &root.join(VERIFY_KEY_PATH))?;
        }
        Ok(())
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn replace_file(source: &Path, dest: &Path) -> io::Result<()> {
    create_parent(dest)?;
    fs::copy(source, dest)?;
    Ok(())
}

/// Set top-level string keys of the JSON configuration, keeping the rest
fn update_mender_conf(path: &Path, updates: &[(&str, &str)]) -> io::Result<()> {
    let raw = fs::read(path)?;
    let mut conf: Value = serde_json::from_slice(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let map = conf.as_object_mut().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a JSON object", path.display()),
        )
    })?;
    for (key, value) in updates {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    let data =
        serde_json::to_vec_pretty(&conf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, data)
}

#[derive(Debug, Clone, Default)]
pub struct ModifyArgs {
    /// Artifact or bare filesystem image
    pub path: PathBuf,
    /// Private key for signing the modified artifact
    pub key: Option<PathBuf>,
    pub server_uri: Option<String>,
    pub server_cert: Option<PathBuf>,
    pub verification_key: Option<PathBuf>,
    pub artifact_name: Option<String>,
    pub tenant_token: Option<String>,
}

impl ModifyArgs {
    pub fn image_edits(&self) -> ImageEdits {
        ImageEdits {
            artifact_name: self.artifact_name.clone(),
            server_uri: self.server_uri.clone(),
            server_cert: self.server_cert.clone(),
            verification_key: self.verification_key.clone(),
            tenant_token: self.tenant_token.clone(),
        }
    }
}

/// What `modify` changed
#[derive(Debug)]
pub enum ModifyReport {
    /// The input was an artifact and has been rewritten
    Artifact(RepackReport),
    /// The input was a bare image, edited in place
    Image,
}

enum Unpacked {
    Artifact(PathBuf),
    Image,
}

/// Modify the artifact or image at `args.path` in place.
///
/// Without a mounter only the artifact name in the header and the
/// signature can change; other edits are refused.
pub fn modify(
    args: &ModifyArgs,
    config: &ToolConfig,
    mounter: Option<&dyn PayloadMounter>,
) -> Result<ModifyReport, CommandError> {
    let edits = args.image_edits();
    if edits.is_empty() && args.key.is_none() {
        return Err(CommandError::InvalidArguments(
            "nothing to modify; give a new name, key or configuration value".to_string(),
        ));
    }
    if let Some(name) = &args.artifact_name {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(CommandError::InvalidArguments(
                "whitespace is not allowed in the artifact-name".to_string(),
            ));
        }
    }
    if edits.touches_configuration() && mounter.is_none() {
        return Err(CommandError::InvalidArguments(
            "editing the payload filesystem needs a mount helper and none is available"
                .to_string(),
        ));
    }

    let signer = optional_signer(args.key.as_deref())?;
    let scratch_parent = scratch_dir(config)?;
    let scratch = match scratch_parent {
        Some(dir) => TempDir::new_in(dir)?,
        None => TempDir::new()?,
    };

    let replacement = match mounter {
        Some(mounter) if !edits.is_empty() => {
            match unpack_payload(&args.path, scratch.path())? {
                Unpacked::Artifact(image) => {
                    edit_image(mounter, &image, &edits)?;
                    Some(image)
                }
                Unpacked::Image => {
                    if signer.is_some() {
                        return Err(CommandError::InvalidArguments(
                            "a signing key can only be used with an artifact".to_string(),
                        ));
                    }
                    edit_image(mounter, &args.path, &edits)?;
                    info!(path = %args.path.display(), "image modified");
                    return Ok(ModifyReport::Image);
                }
            }
        }
        _ => {
            debug!("no payload edits, rewriting header only");
            None
        }
    };

    let source = open_artifact(&args.path)?;
    let options = RepackOptions {
        artifact_name: args.artifact_name.as_deref(),
        replacement: replacement.as_deref(),
        signer: signer.as_ref().map(|s| s as &dyn Signer),
        scratch_dir: Some(scratch.path()),
        ..Default::default()
    };
    let report = place_atomically(&args.path, |out: &mut dyn Write| {
        Ok::<_, CommandError>(repack(BufReader::new(source), out, options)?)
    })?;

    if report.source.signed && !report.written.signed {
        warn!(path = %args.path.display(), "signature dropped; sign the artifact again");
    }
    info!(
        path = %args.path.display(),
        artifact_name = %report.written.artifact_name,
        payload_replaced = replacement.is_some(),
        "artifact modified"
    );
    Ok(ModifyReport::Artifact(report))
}

fn edit_image(
    mounter: &dyn PayloadMounter,
    image: &Path,
    edits: &ImageEdits,
) -> Result<(), CommandError> {
    mounter
        .with_mounted(image, &mut |root: &Path| edits.apply(root))
        .map_err(|e| CommandError::Modify(e.to_string()))
}

/// Copy the single payload file of the artifact at `path` into `scratch`.
///
/// Input that does not even start like an artifact is taken to be a bare
/// filesystem image.
fn unpack_payload(path: &Path, scratch: &Path) -> Result<Unpacked, CommandError> {
    let image = scratch.join("payload.img");
    let mut files = 0usize;

    let outcome = {
        let installer = RootfsInstaller::new(
            |data: &mut dyn Read, file: &DataFile| -> Result<(), BoxError> {
                files += 1;
                if files > 1 {
                    return Err(format!(
                        "payload editing needs a single payload file, found another: {}",
                        file.name
                    )
                    .into());
                }
                io::copy(data, &mut File::create(&image)?)?;
                Ok(())
            },
        );
        ArtifactReader::new(BufReader::new(open_artifact(path)?))
            .with_verifier(AcceptAll)
            .with_handler(installer)?
            .read()
    };

    match outcome.artifact {
        Ok(info) if info.updates.len() == 1 => {
            debug!(path = %path.display(), "payload unpacked");
            Ok(Unpacked::Artifact(image))
        }
        Ok(info) => Err(ArtifactError::InvalidRepack(format!(
            "payload editing needs exactly one payload, artifact has {}",
            info.updates.len()
        ))
        .into()),
        Err(ArtifactError::Format(reason)) if outcome.state == ReadState::AwaitingVersion => {
            debug!(path = %path.display(), %reason, "not an artifact, treating as image");
            Ok(Unpacked::Image)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rootfs() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("etc/mender")).unwrap();
        fs::write(
            root.path().join(MENDER_CONF_PATH),
            r#"{"ServerURL":"https://old.example.com","RootfsPartA":"/dev/mmcblk0p2"}"#,
        )
        .unwrap();
        root
    }

    #[test]
    fn test_name_record() {
        let root = rootfs();
        let edits = ImageEdits {
            artifact_name: Some("release-2".to_string()),
            ..Default::default()
        };
        edits.apply(root.path()).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join(ARTIFACT_INFO_PATH)).unwrap(),
            "artifact_name=release-2"
        );
    }

    #[test]
    fn test_conf_keys_replaced_and_others_kept() {
        let root = rootfs();
        let edits = ImageEdits {
            server_uri: Some("https://new.example.com".to_string()),
            tenant_token: Some("tenant-abc".to_string()),
            ..Default::default()
        };
        edits.apply(root.path()).unwrap();

        let conf: Value =
            serde_json::from_slice(&fs::read(root.path().join(MENDER_CONF_PATH)).unwrap())
                .unwrap();
        assert_eq!(conf["ServerURL"], "https://new.example.com");
        assert_eq!(conf["TenantToken"], "tenant-abc");
        assert_eq!(conf["RootfsPartA"], "/dev/mmcblk0p2");
    }

    #[test]
    fn test_conf_must_be_object() {
        let root = rootfs();
        fs::write(root.path().join(MENDER_CONF_PATH), "[1, 2]").unwrap();
        let edits = ImageEdits {
            server_uri: Some("https://new.example.com".to_string()),
            ..Default::default()
        };
        let err = edits.apply(root.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_cert_and_key_copied() {
        let root = rootfs();
        let inputs = TempDir::new().unwrap();
        let cert = inputs.path().join("server.crt");
        let key = inputs.path().join("verify.pem");
        fs::write(&cert, "CERT").unwrap();
        fs::write(&key, "KEY").unwrap();

        let edits = ImageEdits {
            server_cert: Some(cert),
            verification_key: Some(key),
            ..Default::default()
        };
        edits.apply(root.path()).unwrap();

        assert_eq!(
            fs::read_to_string(root.path().join(SERVER_CERT_PATH)).unwrap(),
            "CERT"
        );
        assert_eq!(
            fs::read_to_string(root.path().join(VERIFY_KEY_PATH)).unwrap(),
            "KEY"
        );
    }

    #[test]
    fn test_edit_classification() {
        let mut edits = ImageEdits::default();
        assert!(edits.is_empty());
        edits.artifact_name = Some("x".to_string());
        assert!(!edits.is_empty());
        assert!(!edits.touches_configuration());
        edits.tenant_token = Some("t".to_string());
        assert!(edits.touches_configuration());
    }
}
