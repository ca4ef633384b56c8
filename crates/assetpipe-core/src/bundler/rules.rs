//! Rule matching: which transform pipeline applies to a file.
//!
//! Rules are tried in declaration order and the first one that admits the
//! path wins. Rules never merge.

use regex_lite::Regex;

use super::naming::OutputTemplate;
use super::TransformKind;
use crate::config::RuleConfig;
use crate::error::Error;

/// Output template for resources whose rule names none.
pub const DEFAULT_RESOURCE_TEMPLATE: &str = "assets/[name][ext]";

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    test: Regex,
    include: Vec<String>,
    exclude: Option<Regex>,
    transforms: Vec<TransformKind>,
    filename: OutputTemplate,
}

impl Rule {
    /// Compile one rule from its config form.
    pub fn compile(config: &RuleConfig) -> Result<Self, Error> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            Error::InvalidConfig(format!("rule `{}`: {what}: {e}", config.name))
        };

        if config.transforms.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "rule `{}`: no transforms",
                config.name
            )));
        }

        let test = Regex::new(&config.test).map_err(|e| invalid("test", &e))?;
        let exclude = config
            .exclude
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| invalid("exclude", &e))?;
        let filename = OutputTemplate::parse(
            config
                .filename
                .as_deref()
                .unwrap_or(DEFAULT_RESOURCE_TEMPLATE),
        )?;

        Ok(Self {
            name: config.name.clone(),
            test,
            include: config
                .include
                .iter()
                .map(|p| normalize(p).trim_end_matches('/').to_string())
                .collect(),
            exclude,
            transforms: config.transforms.clone(),
            filename,
        })
    }

    /// Whether this rule admits a project-relative, forward-slash path.
    #[must_use]
    pub fn admits(&self, path: &str) -> bool {
        let path = normalize(path);
        if !self.test.is_match(path) {
            return false;
        }
        if !self.include.is_empty()
            && !self
                .include
                .iter()
                .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}/")))
        {
            return false;
        }
        !self.exclude.as_ref().is_some_and(|re| re.is_match(path))
    }

    #[must_use]
    pub fn transforms(&self) -> &[TransformKind] {
        &self.transforms
    }

    /// Output template used by the `resource` transform.
    #[must_use]
    pub fn filename(&self) -> &OutputTemplate {
        &self.filename
    }
}

fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Ordered, compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_config(configs: &[RuleConfig]) -> Result<Self, Error> {
        let rules = configs.iter().map(Rule::compile).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// The first rule admitting `path`, or `None` for pass-through.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.admits(path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_rules;

    fn defaults() -> RuleSet {
        RuleSet::from_config(&default_rules()).unwrap()
    }

    fn matched(rules: &RuleSet, path: &str) -> Option<String> {
        rules.match_path(path).map(|r| r.name.clone())
    }

    #[test]
    fn test_default_rules() {
        let rules = defaults();
        assert_eq!(matched(&rules, "src/app.ts").as_deref(), Some("scripts"));
        assert_eq!(matched(&rules, "./src/app.ts").as_deref(), Some("scripts"));
        assert_eq!(matched(&rules, "src/styles/main.scss").as_deref(), Some("styles"));
        assert_eq!(matched(&rules, "src/styles/theme.SASS").as_deref(), Some("styles"));
        assert_eq!(matched(&rules, "node_modules/x/a.css").as_deref(), Some("styles"));
        assert_eq!(matched(&rules, "src/assets/images/logo.PNG").as_deref(), Some("images"));
        assert_eq!(matched(&rules, "src/fonts/icons.woff2").as_deref(), Some("fonts"));
        assert_eq!(matched(&rules, "src/assets/videos/intro.mp4").as_deref(), Some("videos"));
    }

    #[test]
    fn test_first_match_wins() {
        // svg matches both images and fonts; images is declared first
        let rules = defaults();
        assert_eq!(matched(&rules, "src/fonts/icons.svg").as_deref(), Some("images"));
    }

    #[test]
    fn test_include_and_exclude() {
        let rules = defaults();
        // outside `src`
        assert_eq!(matched(&rules, "lib/util.ts"), None);
        // excluded
        assert_eq!(matched(&rules, "src/node_modules/x/index.ts"), None);
        // prefix must end at a path boundary
        assert_eq!(matched(&rules, "srcgen/app.ts"), None);
    }

    #[test]
    fn test_no_match_is_pass_through() {
        let rules = defaults();
        assert_eq!(matched(&rules, "src/vendor/legacy.js"), None);
        assert_eq!(matched(&rules, "src/data/strings.json"), None);
    }

    #[test]
    fn test_same_pattern_same_pipeline() {
        let rules = defaults();
        let a = rules.match_path("src/a.scss").unwrap().transforms().to_vec();
        let b = rules.match_path("src/deep/b.css").unwrap().transforms().to_vec();
        assert_eq!(a, b);
        assert_eq!(
            a,
            vec![
                TransformKind::Sass,
                TransformKind::Css,
                TransformKind::ExtractCss
            ]
        );
    }

    #[test]
    fn test_invalid_regex() {
        let mut configs = default_rules();
        configs[0].exclude = Some("[".into());
        let err = RuleSet::from_config(&configs).unwrap_err();
        assert!(err.to_string().contains("rule `scripts`"), "{err}");
    }

    #[test]
    fn test_empty_transforms_rejected() {
        let mut configs = default_rules();
        configs[1].transforms.clear();
        assert!(RuleSet::from_config(&configs).is_err());
    }
}
