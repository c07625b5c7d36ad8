//! Modify Tests
//!
//! Payload edits go through a mounter; header-only changes do not need one.

mod common;

use std::fs;

use common::{
    image_file, key_files, payload_files, rootfs_image, tool_config, write_artifact, TarMounter,
};
use mender_artifact::commands::modify::{ModifyReport, MENDER_CONF_PATH};
use mender_artifact::commands::{
    modify, validate, ModifyArgs, ValidateArgs, EXIT_INVALID_PARAMETERS,
};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn test_server_uri_and_name_edit_payload() {
    let dir = TempDir::new().unwrap();
    let image = rootfs_image(dir.path());
    let path = write_artifact(dir.path(), "release-1", &image, None, 2);

    let args = ModifyArgs {
        path: path.clone(),
        server_uri: Some("https://onprem.example.com".to_string()),
        tenant_token: Some("tenant-42".to_string()),
        artifact_name: Some("release-2".to_string()),
        ..Default::default()
    };
    let report = modify(&args, &tool_config(&path), Some(&TarMounter)).unwrap();
    match report {
        ModifyReport::Artifact(report) => {
            assert_eq!(report.source.artifact_name, "release-1");
            assert_eq!(report.written.artifact_name, "release-2");
        }
        ModifyReport::Image => panic!("artifact was treated as a bare image"),
    }

    let info = validate(
        &ValidateArgs {
            path: path.clone(),
            key: None,
        },
        &mut Vec::new(),
    )
    .unwrap();
    assert_eq!(info.artifact_name, "release-2");

    let files = payload_files(&path);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, "rootfs.img");

    let conf: Value =
        serde_json::from_slice(&image_file(&files[0].1, MENDER_CONF_PATH).unwrap()).unwrap();
    assert_eq!(conf["ServerURL"], "https://onprem.example.com");
    assert_eq!(conf["TenantToken"], "tenant-42");
    assert_eq!(conf["RootfsPartA"], "/dev/mmcblk0p2");
    assert_eq!(
        image_file(&files[0].1, "etc/mender/artifact_info").unwrap(),
        b"artifact_name=release-2"
    );
}

#[test]
fn test_rename_and_sign_without_mounter() {
    let dir = TempDir::new().unwrap();
    let (private, public) = key_files(dir.path(), "signing");
    let image = rootfs_image(dir.path());
    let path = write_artifact(dir.path(), "release-1", &image, None, 2);
    let original_payload = payload_files(&path);

    let args = ModifyArgs {
        path: path.clone(),
        key: Some(private),
        artifact_name: Some("release-2".to_string()),
        ..Default::default()
    };
    modify(&args, &tool_config(&path), None).unwrap();

    let info = validate(
        &ValidateArgs {
            path: path.clone(),
            key: Some(public),
        },
        &mut Vec::new(),
    )
    .unwrap();
    assert_eq!(info.artifact_name, "release-2");
    assert!(info.signed);
    assert_eq!(payload_files(&path), original_payload);
}

#[test]
fn test_configuration_edit_needs_mounter() {
    let dir = TempDir::new().unwrap();
    let image = rootfs_image(dir.path());
    let path = write_artifact(dir.path(), "release-1", &image, None, 2);
    let before = fs::read(&path).unwrap();

    let args = ModifyArgs {
        path: path.clone(),
        server_uri: Some("https://onprem.example.com".to_string()),
        ..Default::default()
    };
    let err = modify(&args, &tool_config(&path), None).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_INVALID_PARAMETERS);
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_nothing_to_modify() {
    let dir = TempDir::new().unwrap();
    let image = rootfs_image(dir.path());
    let path = write_artifact(dir.path(), "release-1", &image, None, 2);

    let args = ModifyArgs {
        path: path.clone(),
        ..Default::default()
    };
    let err = modify(&args, &tool_config(&path), Some(&TarMounter)).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_INVALID_PARAMETERS);
}

#[test]
fn test_bare_image_edited_in_place() {
    let dir = TempDir::new().unwrap();
    let image = rootfs_image(dir.path());
    let cert = dir.path().join("server.crt");
    fs::write(&cert, "-----BEGIN CERTIFICATE-----\n").unwrap();

    let args = ModifyArgs {
        path: image.clone(),
        server_cert: Some(cert),
        ..Default::default()
    };
    let report = modify(&args, &tool_config(&image), Some(&TarMounter)).unwrap();
    assert!(matches!(report, ModifyReport::Image));

    let content = fs::read(&image).unwrap();
    assert_eq!(
        image_file(&content, "etc/mender/server.crt").unwrap(),
        b"-----BEGIN CERTIFICATE-----\n"
    );
}

#[test]
fn test_failed_edit_leaves_artifact_untouched() {
    let dir = TempDir::new().unwrap();
    let image = rootfs_image(dir.path());
    let path = write_artifact(dir.path(), "release-1", &image, None, 2);
    let before = fs::read(&path).unwrap();

    let args = ModifyArgs {
        path: path.clone(),
        server_cert: Some(dir.path().join("absent.crt")),
        ..Default::default()
    };
    let err = modify(&args, &tool_config(&path), Some(&TarMounter)).unwrap_err();
    assert!(err.to_string().starts_with("can not modify payload image"));
    assert_eq!(fs::read(&path).unwrap(), before);
}
