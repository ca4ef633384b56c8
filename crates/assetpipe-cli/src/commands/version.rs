use assetpipe_core::version::{version_string, SCHEMA_VERSION};
use assetpipe_core::VERSION;
use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "name": "assetpipe",
            "version": VERSION,
        });
        println!("{output}");
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
