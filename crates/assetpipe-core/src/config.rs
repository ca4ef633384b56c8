//! Pipeline configuration.
//!
//! Loaded from `assetpipe.json` in the project root. Every field is optional;
//! missing fields take the defaults below, and the CLI layers its flags on
//! top through the `with_*` setters.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bundler::chunks::VENDORS;
use crate::bundler::naming::{stays_inside, OutputTemplate};
use crate::bundler::{rules::RuleSet, TransformKind};
use crate::error::Error;

/// Config file looked up in the project root.
pub const CONFIG_FILE: &str = "assetpipe.json";

/// Upper bound for the transform pool.
pub const MAX_PARALLEL_LIMIT: usize = 64;

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Project root; every relative path below is resolved against it.
    #[serde(skip)]
    pub root: PathBuf,

    /// Replaces `process.env.NODE_ENV` in scripts.
    pub mode: Mode,

    /// Entry points, in declaration order.
    pub entries: Vec<EntryPoint>,

    pub output: OutputConfig,

    pub resolve: ResolveConfig,

    /// Transform rules, first match wins.
    pub rules: Vec<RuleConfig>,

    pub optimization: OptimizationConfig,

    /// Directories copied verbatim into the output.
    pub copy: Vec<CopyPattern>,

    /// Generated HTML document; `null` disables it.
    pub html: Option<HtmlConfig>,

    pub dev: DevConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// A named entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryPoint {
    pub name: String,
    pub import: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: String,
    /// Prefix of every URL written into HTML, CSS and the manifest.
    pub public_path: String,
    pub filename: String,
    pub chunk_filename: String,
    pub css_filename: String,
    pub css_chunk_filename: String,
    /// Remove files from earlier builds after publishing.
    pub clean: bool,
    /// Paths (relative to the output dir) that cleaning never removes.
    pub keep: Vec<String>,
    /// Manifest file name; `null` disables it.
    pub manifest: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "public".to_string(),
            public_path: "/".to_string(),
            filename: "js/[name].[contenthash].js".to_string(),
            chunk_filename: "js/[name].[contenthash].chunk.js".to_string(),
            css_filename: "css/[name].[contenthash].css".to_string(),
            css_chunk_filename: "css/[name].[contenthash].chunk.css".to_string(),
            clean: true,
            keep: vec!["index.html".to_string()],
            manifest: Some("asset-manifest.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolveConfig {
    /// Extensions tried, in order, for extensionless specifiers.
    pub extensions: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".ts".to_string(), ".js".to_string()],
        }
    }
}

/// One transform rule as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub name: String,
    /// Regex tested against the project-relative path.
    pub test: String,
    /// Path prefixes the file must live under; empty admits everything.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Regex that rejects a path even when `test` matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    pub transforms: Vec<TransformKind>,
    /// Output template for `resource` transforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl RuleConfig {
    fn new(name: &str, test: &str, transforms: &[TransformKind]) -> Self {
        Self {
            name: name.to_string(),
            test: test.to_string(),
            include: Vec::new(),
            exclude: None,
            transforms: transforms.to_vec(),
            filename: None,
        }
    }

    fn resource(name: &str, test: &str, filename: &str) -> Self {
        Self {
            filename: Some(filename.to_string()),
            ..Self::new(name, test, &[TransformKind::Resource])
        }
    }
}

/// The stock rule set: TypeScript, styles, images, fonts, videos.
#[must_use]
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            include: vec!["src".to_string()],
            exclude: Some("node_modules".to_string()),
            ..RuleConfig::new("scripts", r"\.ts$", &[TransformKind::Script])
        },
        RuleConfig::new(
            "styles",
            r"(?i)\.s?[ac]ss$",
            &[
                TransformKind::Sass,
                TransformKind::Css,
                TransformKind::ExtractCss,
            ],
        ),
        RuleConfig::resource(
            "images",
            r"(?i)\.(png|jpe?g|gif|svg|ico)$",
            "assets/images/[name][ext]",
        ),
        RuleConfig::resource(
            "fonts",
            r"(?i)\.woff($|\?)|\.woff2($|\?)|\.ttf($|\?)|\.eot($|\?)|\.svg($|\?)",
            "assets/fonts/[name][ext]",
        ),
        RuleConfig::resource(
            "videos",
            r"(?i)\.(mp4|webm|ogg|mov)$",
            "assets/videos/[name][ext]",
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Minify scripts and stylesheets, dropping every comment.
    pub minify: bool,
    /// Move `node_modules` code into a `vendors` bundle.
    pub split_vendors: bool,
    /// Transform pool size; defaults to the available parallelism.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            minify: true,
            split_vendors: true,
            max_parallel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyPattern {
    pub from: String,
    pub to: String,
    #[serde(default = "default_true")]
    pub no_error_on_missing: bool,
}

fn default_true() -> bool {
    true
}

#[must_use]
pub fn default_copy_patterns() -> Vec<CopyPattern> {
    ["images", "videos"]
        .into_iter()
        .map(|kind| CopyPattern {
            from: format!("src/assets/{kind}"),
            to: format!("assets/{kind}"),
            no_error_on_missing: true,
        })
        .collect()
}

/// Where script tags go in the generated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Inject {
    Head,
    #[default]
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlConfig {
    /// Template path; a missing file falls back to a generated document.
    pub template: Option<String>,
    pub filename: String,
    pub inject: Inject,
    /// Title of the generated fallback document.
    pub title: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: Some("src/index.html".to_string()),
            filename: "index.html".to_string(),
            inject: Inject::Body,
            title: "assetpipe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevConfig {
    pub host: String,
    pub port: u16,
    /// gzip responses.
    pub compress: bool,
    pub overlay: OverlayConfig,
    /// Log per-wave build progress.
    pub progress: bool,
    /// Inject the live-reload client into served HTML.
    pub hot: bool,
    pub watch: WatchConfig,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1234,
            compress: false,
            overlay: OverlayConfig::default(),
            progress: true,
            hot: true,
            watch: WatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    pub errors: bool,
    pub warnings: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            errors: true,
            warnings: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Globs, relative to the project root.
    pub files: Vec<String>,
    /// Poll interval; `null` uses native file system events.
    pub poll_ms: Option<u64>,
    /// Regex; matching paths never trigger a rebuild.
    pub ignored: String,
    /// Quiet period before a batch of events is handed to the rebuild loop.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            files: vec!["src/**/*".to_string()],
            poll_ms: Some(1000),
            ignored: "node_modules".to_string(),
            debounce_ms: 50,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            mode: Mode::default(),
            entries: vec![EntryPoint {
                name: "main".to_string(),
                import: "./src/app.ts".to_string(),
            }],
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: default_rules(),
            optimization: OptimizationConfig::default(),
            copy: default_copy_patterns(),
            html: Some(HtmlConfig::default()),
            dev: DevConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Load the config for a project.
    ///
    /// An explicit path must exist. Without one, `assetpipe.json` in `root`
    /// is used when present, defaults otherwise.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, Error> {
        let path = match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => root.join(p),
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.is_file() {
                    tracing::debug!(root = %root.display(), "no config file, using defaults");
                    let config = Self::new(root.to_path_buf());
                    config.validate()?;
                    return Ok(config);
                }
                candidate
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
            path: path.clone(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.clone(),
                source,
            })?;
        config.root = root.to_path_buf();
        config.validate()?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Check everything that can be checked before a build starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.entries.is_empty() {
            return Err(Error::InvalidConfig("at least one entry is required".into()));
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name.is_empty() || entry.name.contains(['~', '/', '\\']) {
                return Err(Error::InvalidConfig(format!(
                    "entry name `{}` must be non-empty and must not contain `~` or path separators",
                    entry.name
                )));
            }
            if entry.name == VENDORS {
                return Err(Error::InvalidConfig(format!(
                    "entry name `{VENDORS}` is reserved for the vendor bundle"
                )));
            }
            if self.entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate entry name `{}`",
                    entry.name
                )));
            }
        }

        for template in [
            &self.output.filename,
            &self.output.chunk_filename,
            &self.output.css_filename,
            &self.output.css_chunk_filename,
        ] {
            OutputTemplate::parse(template)?;
        }

        RuleSet::from_config(&self.rules)?;

        for pattern in &self.copy {
            if !stays_inside(&pattern.to) {
                return Err(Error::InvalidConfig(format!(
                    "copy target `{}` must stay inside the output directory",
                    pattern.to
                )));
            }
        }

        regex_lite::Regex::new(&self.dev.watch.ignored).map_err(|e| {
            Error::InvalidConfig(format!("watch.ignored `{}`: {e}", self.dev.watch.ignored))
        })?;
        for pattern in &self.dev.watch.files {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidConfig(format!("watch glob `{pattern}`: {e}")))?;
        }

        if self.optimization.max_parallel == Some(0) {
            return Err(Error::InvalidConfig("max_parallel must be at least 1".into()));
        }
        if self.dev.watch.poll_ms == Some(0) {
            return Err(Error::InvalidConfig("watch.poll_ms must be at least 1".into()));
        }

        Ok(())
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Transform pool size: the configured value, else the available
    /// parallelism, clamped to `1..=64`.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.optimization
            .max_parallel
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
            .clamp(1, MAX_PARALLEL_LIMIT)
    }

    /// Pretty JSON as written by `assetpipe init`.
    pub fn to_json_pretty(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::other(e.to_string()))
    }

    #[must_use]
    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = root;
        self
    }

    #[must_use]
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.optimization.minify = minify;
        self
    }

    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.optimization.max_parallel = Some(max_parallel);
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, dir: impl Into<String>) -> Self {
        self.output.dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the entry list with a single entry.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, import: impl Into<String>) -> Self {
        self.entries = vec![EntryPoint {
            name: name.into(),
            import: import.into(),
        }];
        self
    }

    /// Append another entry.
    #[must_use]
    pub fn add_entry(mut self, name: impl Into<String>, import: impl Into<String>) -> Self {
        self.entries.push(EntryPoint {
            name: name.into(),
            import: import.into(),
        });
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.dev.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.dev.port = port;
        self
    }

    /// `None` switches the watcher to native events.
    #[must_use]
    pub fn with_poll_ms(mut self, poll_ms: Option<u64>) -> Self {
        self.dev.watch.poll_ms = poll_ms;
        self
    }
}
