//! Path Validation Integration Tests
//!
//! Every submitted path either validates or is rejected with a validation
//! error. Nothing is created or modified along the way.

use malscan_engine::error::{ScanError, ScanStage};
use malscan_engine::services::path_validator::validate;
use std::path::Path;

const MAX: u64 = 1024 * 1024;

#[test]
fn regular_file_validates_with_size() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("invoice.pdf");
    std::fs::write(&file, vec![0u8; 10 * 1024]).unwrap();

    let validated = validate(file.to_str().unwrap(), MAX).unwrap();
    assert_eq!(validated.path, file.canonicalize().unwrap());
    assert_eq!(validated.size, 10 * 1024);
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.exe");

    let err = validate(missing.to_str().unwrap(), MAX).unwrap_err();
    assert!(matches!(err, ScanError::NotFound { .. }));
    assert_eq!(err.stage(), ScanStage::Validation);
    assert!(!missing.exists());
}

#[test]
fn directory_is_not_a_regular_file() {
    let dir = tempfile::tempdir().unwrap();

    let err = validate(dir.path().to_str().unwrap(), MAX).unwrap_err();
    assert!(matches!(err, ScanError::NotRegularFile { .. }));
}

#[cfg(unix)]
#[test]
fn device_node_is_not_a_regular_file() {
    let err = validate("/dev/null", MAX).unwrap_err();
    assert!(matches!(err, ScanError::NotRegularFile { .. }));
}

#[cfg(unix)]
#[test]
fn symlink_to_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("folder");
    std::fs::create_dir(&target).unwrap();
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let err = validate(link.to_str().unwrap(), MAX).unwrap_err();
    assert!(matches!(err, ScanError::NotRegularFile { .. }));
}

#[cfg(unix)]
#[test]
fn symlink_to_file_is_followed() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("sample.bin");
    std::fs::write(&target, b"MZ\x90\x00").unwrap();
    let link = dir.path().join("link.bin");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let validated = validate(link.to_str().unwrap(), MAX).unwrap();
    assert_eq!(validated.size, 4);
}

#[cfg(unix)]
#[test]
fn parent_of_symlinked_directory_follows_the_link() {
    // link -> a/b, so link/.. is a, not the directory holding the link
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();
    let target = dir.path().join("a").join("target.bin");
    std::fs::write(&target, b"MZ\x90\x00").unwrap();
    let link = dir.path().join("link");
    std::os::unix::fs::symlink(&nested, &link).unwrap();

    let input = link.join("..").join("target.bin");
    assert!(std::fs::metadata(&input).is_ok());

    let validated = validate(input.to_str().unwrap(), MAX).unwrap();
    assert_eq!(validated.path, target.canonicalize().unwrap());
    assert_eq!(validated.size, 4);
}

#[cfg(unix)]
#[test]
fn dangling_symlink_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let link = dir.path().join("dangling");
    std::os::unix::fs::symlink(dir.path().join("gone"), &link).unwrap();

    let err = validate(link.to_str().unwrap(), MAX).unwrap_err();
    assert!(matches!(err, ScanError::NotFound { .. }));
}

#[test]
fn oversize_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("big.iso");
    std::fs::write(&file, vec![1u8; 2048]).unwrap();

    match validate(file.to_str().unwrap(), 1024).unwrap_err() {
        ScanError::SizeLimitExceeded { size, max, .. } => {
            assert_eq!(size, 2048);
            assert_eq!(max, 1024);
        }
        other => panic!("unexpected error: {}", other),
    }

    // Exactly at the ceiling is accepted
    assert!(validate(file.to_str().unwrap(), 2048).is_ok());
}

#[test]
fn empty_path_is_resolution_error() {
    assert!(matches!(
        validate("", MAX),
        Err(ScanError::PathResolution { .. })
    ));
}

#[test]
fn relative_path_resolves_against_working_directory() {
    let dir = tempfile::Builder::new()
        .prefix("validator-")
        .tempdir_in(".")
        .unwrap();
    let name = dir.path().file_name().unwrap().to_str().unwrap().to_string();
    std::fs::write(dir.path().join("sample.txt"), b"hello").unwrap();

    let relative = format!("./{}/../{}/sample.txt", name, name);
    let validated = validate(&relative, MAX).unwrap();

    assert!(validated.path.is_absolute());
    assert!(validated.path.ends_with(Path::new(&name).join("sample.txt")));
    assert_eq!(validated.size, 5);
}
