use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::process::Command;
use tempfile::TempDir;

fn ownkeeper() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ownkeeper"));
    for var in ["FOLDERS", "CONFIG_FILE", "PORT", "LOG_LEVEL", "POLL_INTERVAL", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_config_command_prints_effective_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        r#"
pollInterval: 45s
folders:
  - path: /data/media
    uid: 1000
    gid: 1000
    mode: 0755
"#,
    )
    .unwrap();

    let output = ownkeeper()
        .args(["--config", config_path.to_str().unwrap(), "config"])
        .output()
        .expect("Failed to run config command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("pollInterval = \"45s\""));
    assert!(stdout.contains("path = \"/data/media\""));
    assert!(stdout.contains("mode = \"0755\""));
}

#[test]
fn test_legacy_folders_variable() {
    let output = ownkeeper()
        .env("FOLDERS", "/data/media:1000:1000:0775")
        .arg("config")
        .output()
        .expect("Failed to run config command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("mode = \"0775\""));
}

#[test]
fn test_invalid_configuration_is_fatal() {
    let output = ownkeeper()
        .env("FOLDERS", "relative/path:1000:1000:0755")
        .arg("config")
        .output()
        .expect("Failed to run config command");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Configuration error"));

    let output = ownkeeper().arg("config").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_check_dry_run_then_fix() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let file = root.join("episode.mkv");
    std::fs::write(&file, "x").unwrap();
    std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();
    std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o755)).unwrap();

    let meta = std::fs::metadata(root).unwrap();
    let config_path = root.join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "folders:\n  - path: {}\n    uid: {}\n    gid: {}\n    fileMode: \"0644\"\n    folderMode: \"0755\"\n    exclude: [\"*.yaml\"]\n",
            root.display(),
            meta.uid(),
            meta.gid()
        ),
    )
    .unwrap();

    let dry = ownkeeper()
        .args(["--config", config_path.to_str().unwrap(), "check", "--dry-run"])
        .output()
        .unwrap();
    assert!(dry.status.success());
    let stdout = String::from_utf8(dry.stdout).unwrap();
    assert!(stdout.contains("Would fix"));
    assert_eq!(std::fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o600);

    let fix = ownkeeper()
        .args(["--config", config_path.to_str().unwrap(), "check"])
        .output()
        .unwrap();
    assert!(fix.status.success());
    assert_eq!(std::fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o644);
}

#[test]
fn test_layout_only_created_by_enforcing_check() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("data");
    let config_path = temp_dir.path().join("config.yaml");
    let (uid, gid) = {
        let meta = std::fs::metadata(temp_dir.path()).unwrap();
        (meta.uid(), meta.gid())
    };
    std::fs::write(
        &config_path,
        format!(
            "trashGuides:\n  enabled: true\n  createStructure: true\n  type: torrent\n  rootPath: {}\n  mediaTypes: [movies]\n  uid: {uid}\n  gid: {gid}\n",
            root.display()
        ),
    )
    .unwrap();
    let config = config_path.to_str().unwrap();

    for args in [vec!["config"], vec!["check", "--dry-run"]] {
        let output = ownkeeper()
            .args(["--config", config])
            .args(&args)
            .output()
            .expect("Failed to run command");
        assert_ne!(output.status.code(), Some(2), "{args:?} rejected the config");
        assert!(!root.exists(), "{args:?} created the layout");
    }

    let output = ownkeeper()
        .args(["--config", config, "check"])
        .output()
        .expect("Failed to run check");
    assert!(output.status.success());
    assert!(root.join("torrents/movies").is_dir());
}
