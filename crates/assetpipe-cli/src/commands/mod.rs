pub mod build;
pub mod dev;
pub mod init;
pub mod version;

use serde::Serialize;

/// Error object shared by every `--json` failure.
#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Serialize)]
struct ErrorResult<'a> {
    schema_version: u32,
    ok: bool,
    error: &'a ErrorJson,
}

impl ErrorJson {
    pub fn from_core(err: &assetpipe_core::Error) -> Self {
        match err {
            assetpipe_core::Error::Build(build) => Self {
                code: build.code.to_string(),
                message: build.message.clone(),
                path: build.path.clone(),
            },
            other => Self {
                code: other.code().to_string(),
                message: other.to_string(),
                path: None,
            },
        }
    }

    /// Print the failure (one JSON object on stdout, or a line on stderr)
    /// and exit non-zero.
    pub fn exit(&self, json: bool) -> ! {
        if json {
            let result = ErrorResult {
                schema_version: assetpipe_core::version::SCHEMA_VERSION,
                ok: false,
                error: self,
            };
            println!("{}", serde_json::to_string(&result).unwrap_or_default());
        } else {
            match &self.path {
                Some(path) => eprintln!("error: {}: {} ({path})", self.code, self.message),
                None => eprintln!("error: {}: {}", self.code, self.message),
            }
        }
        std::process::exit(1);
    }
}
