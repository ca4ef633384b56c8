//! Integration tests for `assetpipe build --json` output.

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "assetpipe-cli", "--bin", "assetpipe", "--"]);
    cmd
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn run_build(root: &Path, extra: &[&str]) -> (std::process::Output, serde_json::Value) {
    let output = cargo_bin()
        .arg("--json")
        .arg("--cwd")
        .arg(root)
        .arg("build")
        .args(extra)
        .output()
        .expect("Failed to run build command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.trim().starts_with('{'),
        "stdout should begin with '{{': {stdout}"
    );
    let json: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("stdout should be valid JSON");
    (output, json)
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/app.ts", "import \"./styles/main.css\";\nconst n: number = 2;\nconsole.log(n);\n");
    write(dir.path(), "src/styles/main.css", "body { margin: 0; }\n");

    let (output, json) = run_build(dir.path(), &["--no-minify", "--max-parallel", "2"]);
    assert!(output.status.success());

    assert_eq!(json["schema_version"].as_u64(), Some(1));
    assert_eq!(json["ok"], true);
    assert!(json["modules"].as_u64().unwrap() >= 2);
    assert!(json.get("duration_ms").is_some());
    assert!(json["cache"].get("hits").is_some());

    let bundles = json["bundles"].as_array().expect("bundles should be array");
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0]["name"], "main");
    assert_eq!(bundles[0]["kind"], "entry");

    let artifacts = json["artifacts"].as_array().expect("artifacts should be array");
    let paths: Vec<&str> = artifacts.iter().map(|a| a["path"].as_str().unwrap()).collect();
    assert!(paths.iter().any(|p| p.starts_with("js/main.") && p.ends_with(".js")), "{paths:?}");
    assert!(paths.iter().any(|p| p.starts_with("css/main.") && p.ends_with(".css")), "{paths:?}");
    assert!(paths.contains(&"index.html"));
    assert!(paths.contains(&"asset-manifest.json"));
    for artifact in artifacts {
        assert!(artifact["bytes"].as_u64().unwrap() > 0);
        assert!(artifact["kind"].is_string());
    }

    let written = json["written"].as_array().unwrap();
    assert_eq!(written.len(), artifacts.len());
    for path in &paths {
        assert!(dir.path().join("public").join(path).is_file(), "{path} missing on disk");
    }
}

#[test]
fn test_build_json_second_run_unchanged() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/app.ts", "console.log(1);\n");

    let (_, first) = run_build(dir.path(), &[]);
    assert_eq!(first["ok"], true);

    let (_, second) = run_build(dir.path(), &[]);
    assert_eq!(second["ok"], true);
    assert!(second["written"].as_array().unwrap().is_empty());
    assert_eq!(
        second["unchanged"].as_u64().unwrap(),
        second["artifacts"].as_array().unwrap().len() as u64
    );
}

#[test]
fn test_build_json_missing_entry() {
    let dir = tempdir().unwrap();

    let (output, json) = run_build(dir.path(), &[]);
    assert!(!output.status.success());
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "BUILD_ENTRY_NOT_FOUND");
}

#[test]
fn test_build_json_error_code_format() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/app.ts", "import { x } from \"./missing\";\nconsole.log(x);\n");

    let (output, json) = run_build(dir.path(), &[]);
    assert!(!output.status.success());
    assert_eq!(json["ok"], false);

    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "BUILD_RESOLVE_FAILED");
    assert!(
        code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
        "Code {code} is not SCREAMING_SNAKE_CASE"
    );
    assert!(json["error"]["message"].as_str().unwrap().contains("./missing"));
}

#[test]
fn test_build_json_bad_config() {
    let dir = tempdir().unwrap();
    write(dir.path(), "assetpipe.json", "{ \"output\": { \"filename\": \"js/[nope].js\" } }");

    let (output, json) = run_build(dir.path(), &[]);
    assert!(!output.status.success());
    assert_eq!(json["error"]["code"], "BUILD_CONFIG_INVALID");
}
