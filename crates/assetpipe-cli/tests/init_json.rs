//! Integration tests for `assetpipe init`.

use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "assetpipe-cli", "--bin", "assetpipe", "--"]);
    cmd
}

fn init(root: &std::path::Path, extra: &[&str]) -> (bool, serde_json::Value) {
    let output = cargo_bin()
        .arg("--json")
        .arg("--cwd")
        .arg(root)
        .arg("init")
        .args(extra)
        .output()
        .expect("Failed to run init command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    (output.status.success(), json)
}

#[test]
fn test_init_writes_config_and_starters() {
    let dir = tempdir().unwrap();

    let (ok, json) = init(dir.path(), &[]);
    assert!(ok);
    assert_eq!(json["ok"], true);
    assert_eq!(json["schema_version"].as_u64(), Some(1));

    let created: Vec<&str> = json["created"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(created, vec!["assetpipe.json", "src/app.ts", "src/index.html"]);

    let config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("assetpipe.json")).unwrap()).unwrap();
    assert_eq!(config["output"]["dir"], "public");
    assert_eq!(config["entries"][0]["name"], "main");
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("assetpipe.json"), "{}").unwrap();

    let (ok, json) = init(dir.path(), &[]);
    assert!(!ok);
    assert_eq!(json["error"]["code"], "INIT_CONFIG_EXISTS");
    assert_eq!(std::fs::read_to_string(dir.path().join("assetpipe.json")).unwrap(), "{}");
}

#[test]
fn test_init_force_keeps_sources() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("assetpipe.json"), "{}").unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/app.ts"), "console.log('mine');\n").unwrap();

    let (ok, json) = init(dir.path(), &["--force"]);
    assert!(ok);
    assert_eq!(json["skipped"][0], "src/app.ts");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/app.ts")).unwrap(),
        "console.log('mine');\n"
    );
    assert_ne!(std::fs::read_to_string(dir.path().join("assetpipe.json")).unwrap(), "{}");
}
