//! `assetpipe init` command implementation.
//!
//! Writes a default `assetpipe.json` and, when missing, a starter entry
//! script and HTML template. Existing sources are never overwritten.

use assetpipe_core::config::CONFIG_FILE;
use assetpipe_core::version::SCHEMA_VERSION;
use assetpipe_core::PipelineConfig;
use std::path::Path;

use super::ErrorJson;

const APP_TEMPLATE: &str = r#"const root = document.getElementById("app");
if (root) {
  root.textContent = "Hello from assetpipe!";
}
"#;

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>assetpipe</title>
</head>
<body>
<div id="app"></div>
</body>
</html>
"#;

/// Run the init command.
pub fn run(cwd: &Path, config: Option<&Path>, force: bool, json: bool) -> miette::Result<()> {
    let config_path = match config {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
        None => cwd.join(CONFIG_FILE),
    };
    let display = config_path
        .strip_prefix(cwd)
        .unwrap_or(&config_path)
        .display()
        .to_string();

    if config_path.exists() && !force {
        ErrorJson {
            code: "INIT_CONFIG_EXISTS".to_string(),
            message: format!("{display} already exists (use --force to overwrite)"),
            path: Some(display),
        }
        .exit(json);
    }

    let defaults = PipelineConfig::new(cwd.to_path_buf());
    let content = match defaults.to_json_pretty() {
        Ok(content) => content + "\n",
        Err(e) => ErrorJson::from_core(&e).exit(json),
    };

    let mut created: Vec<String> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();

    write_file(&config_path, &content, json);
    created.push(display);

    let entry = defaults
        .entries
        .first()
        .map_or("src/app.ts", |e| e.import.trim_start_matches("./"));
    let template_path = defaults
        .html
        .as_ref()
        .and_then(|h| h.template.as_deref())
        .unwrap_or("src/index.html");
    for (rel, template) in [(entry, APP_TEMPLATE), (template_path, HTML_TEMPLATE)] {
        let path = cwd.join(rel);
        if path.exists() {
            skipped.push(rel.to_string());
        } else {
            write_file(&path, template, json);
            created.push(rel.to_string());
        }
    }

    if json {
        let output = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "ok": true,
            "created": created,
            "skipped": skipped,
        });
        println!("{output}");
    } else {
        println!("Created:");
        for file in &created {
            println!("  + {file}");
        }
        if !skipped.is_empty() {
            println!("Skipped (already exist):");
            for file in &skipped {
                println!("  - {file}");
            }
        }
        println!();
        println!("Next: assetpipe dev");
    }
    Ok(())
}

fn write_file(path: &Path, content: &str, json: bool) {
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, content));
    if let Err(e) = result {
        ErrorJson {
            code: "INIT_WRITE_FAILED".to_string(),
            message: e.to_string(),
            path: Some(path.display().to_string()),
        }
        .exit(json);
    }
}
