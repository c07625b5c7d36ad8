//! Shared fixtures for the command tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use mender_artifact::commands::{write_rootfs_image, WriteRootfsArgs};
use mender_artifact::config::{EffectiveConfig, ToolConfig};
use mender_artifact::PayloadMounter;
use mender_format::signature::{encode_signing_key, encode_verifying_key, generate_keypair};
use mender_format::{ArtifactReader, BoxError, DataFile, RootfsInstaller};
use serde_json::json;

pub const DEVICE_TYPE: &str = "qemux86-64";

/// Configuration writing to `output` with everything else at defaults
pub fn tool_config(output: &Path) -> ToolConfig {
    EffectiveConfig::build(None, Some(json!({"output_path": output.to_string_lossy()})))
        .unwrap()
        .resolve()
        .unwrap()
}

/// Key pair stored as (private key file, public key file)
pub fn key_files(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    let key = generate_keypair();
    let private = dir.join(format!("{stem}.key"));
    let public = dir.join(format!("{stem}.pub"));
    fs::write(&private, encode_signing_key(&key)).unwrap();
    fs::write(&public, encode_verifying_key(&key.verifying_key())).unwrap();
    (private, public)
}

/// Write an artifact named `name` around `update` into `dir/<name>.mender`
pub fn write_artifact(
    dir: &Path,
    name: &str,
    update: &Path,
    key: Option<&Path>,
    version: u32,
) -> PathBuf {
    let output = dir.join(format!("{name}.mender"));
    let mut config = tool_config(&output);
    config.format_version = version;
    let args = WriteRootfsArgs {
        update: Some(update.to_path_buf()),
        device_types: vec![DEVICE_TYPE.to_string()],
        artifact_name: Some(name.to_string()),
        key: key.map(Path::to_path_buf),
        scripts: Vec::new(),
    };
    write_rootfs_image(&args, &config).unwrap();
    output
}

/// Root filesystem image as a tar archive of a minimal `/etc/mender`
pub fn rootfs_image(dir: &Path) -> PathBuf {
    let tree = dir.join("rootfs-tree");
    fs::create_dir_all(tree.join("etc/mender")).unwrap();
    fs::write(
        tree.join("etc/mender/mender.conf"),
        r#"{"ServerURL":"https://hosted.example.com","RootfsPartA":"/dev/mmcblk0p2"}"#,
    )
    .unwrap();
    fs::write(tree.join("etc/mender/artifact_info"), "artifact_name=release-1").unwrap();

    let image = dir.join("rootfs.img");
    let mut builder = tar::Builder::new(File::create(&image).unwrap());
    builder.append_dir_all(".", &tree).unwrap();
    builder.into_inner().unwrap();
    image
}

/// Read a file out of a tar rootfs image
pub fn image_file(image: &[u8], path: &str) -> Option<Vec<u8>> {
    let mut archive = tar::Archive::new(image);
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let entry_path = entry.path().unwrap().to_string_lossy().to_string();
        if entry_path.trim_start_matches("./") == path {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            return Some(content);
        }
    }
    None
}

/// Content of every payload file, in order
pub fn payload_files(artifact: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    {
        let installer = RootfsInstaller::new(
            |data: &mut dyn Read, file: &DataFile| -> Result<(), BoxError> {
                let mut content = Vec::new();
                data.read_to_end(&mut content)?;
                files.push((file.name.clone(), content));
                Ok(())
            },
        );
        ArtifactReader::new(File::open(artifact).unwrap())
            .with_handler(installer)
            .unwrap()
            .read()
            .into_result()
            .unwrap();
    }
    files
}

/// Mounter for tar-archive images: unpacks, edits, packs back
pub struct TarMounter;

impl PayloadMounter for TarMounter {
    fn with_mounted(
        &self,
        image: &Path,
        edit: &mut dyn FnMut(&Path) -> std::io::Result<()>,
    ) -> Result<(), BoxError> {
        let root = tempfile::TempDir::new()?;
        tar::Archive::new(File::open(image)?).unpack(root.path())?;
        edit(root.path())?;

        let mut builder = tar::Builder::new(File::create(image)?);
        builder.append_dir_all(".", root.path())?;
        builder.into_inner()?;
        Ok(())
    }
}
