//! Entry HTML document generation.

use std::fmt::Write as _;
use std::path::Path;

use super::codes;
use super::emit::public_url;
use super::BuildError;
use crate::config::{HtmlConfig, Inject};

/// Render the HTML document for the given startup files.
///
/// Stylesheets become `<link>` tags before `</head>`; scripts become
/// `<script defer>` tags before `</body>` (or `</head>` with head
/// injection). A template that does not exist falls back to a generated
/// document.
pub fn render_html(
    root: &Path,
    config: &HtmlConfig,
    public_path: &str,
    files: &[String],
) -> Result<String, BuildError> {
    let template = match &config.template {
        Some(rel) => {
            let path = root.join(rel);
            match std::fs::read_to_string(&path) {
                Ok(html) => Some(html),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(template = %rel, "html template missing, generating one");
                    None
                }
                Err(e) => {
                    return Err(BuildError::new(codes::BUILD_READ_FAILED, e.to_string()).with_path(rel.clone()));
                }
            }
        }
        None => None,
    };
    let mut html = template.unwrap_or_else(|| default_document(&config.title));

    let mut links = String::new();
    let mut scripts = String::new();
    for file in files {
        let url = public_url(public_path, file);
        if file.ends_with(".css") {
            let _ = write!(links, "<link href=\"{}\" rel=\"stylesheet\">", escape_attr(&url));
        } else if file.ends_with(".js") {
            let _ = write!(scripts, "<script defer=\"defer\" src=\"{}\"></script>", escape_attr(&url));
        }
    }

    match config.inject {
        Inject::Head => {
            links.push_str(&scripts);
            insert_before(&mut html, "</head>", &links);
        }
        Inject::Body => {
            insert_before(&mut html, "</head>", &links);
            insert_before(&mut html, "</body>", &scripts);
        }
    }
    Ok(html)
}

/// Insert `fragment` before the last `tag` (case-insensitive), or append it.
pub fn insert_before(html: &mut String, tag: &str, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    match html.to_ascii_lowercase().rfind(tag) {
        Some(pos) => html.insert_str(pos, fragment),
        None => html.push_str(fragment),
    }
}

fn default_document(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n<title>{}</title>\n</head>\n<body>\n</body>\n</html>\n",
        escape_text(title)
    )
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// Escape text for an HTML body.
#[must_use]
pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn files() -> Vec<String> {
        vec![
            "css/main.1.css".to_string(),
            "js/vendors.2.chunk.js".to_string(),
            "js/main.3.js".to_string(),
        ]
    }

    #[test]
    fn test_template_injection_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/index.html"),
            "<html><HEAD><title>x</title></HEAD><body><div id=app></div></body></html>",
        )
        .unwrap();

        let html = render_html(dir.path(), &HtmlConfig::default(), "/", &files()).unwrap();
        assert_eq!(
            html,
            "<html><HEAD><title>x</title><link href=\"/css/main.1.css\" rel=\"stylesheet\"></HEAD><body><div id=app></div><script defer=\"defer\" src=\"/js/vendors.2.chunk.js\"></script><script defer=\"defer\" src=\"/js/main.3.js\"></script></body></html>"
        );
    }

    #[test]
    fn test_missing_template_falls_back() {
        let dir = tempdir().unwrap();
        let config = HtmlConfig {
            title: "Shop & Co".to_string(),
            ..HtmlConfig::default()
        };
        let html = render_html(dir.path(), &config, "/", &files()).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Shop &amp; Co</title>"));
        let script = html.find("/js/main.3.js").unwrap();
        assert!(script > html.find("<body>").unwrap());
    }

    #[test]
    fn test_head_injection() {
        let dir = tempdir().unwrap();
        let config = HtmlConfig {
            template: None,
            inject: Inject::Head,
            ..HtmlConfig::default()
        };
        let html = render_html(dir.path(), &config, "/static/", &files()).unwrap();
        let head_end = html.find("</head>").unwrap();
        assert!(html.find("/static/js/main.3.js").unwrap() < head_end);
        assert!(html.find("/static/css/main.1.css").unwrap() < head_end);
    }

    #[test]
    fn test_insert_before_without_tag_appends() {
        let mut html = String::from("<p>hi</p>");
        insert_before(&mut html, "</body>", "<script></script>");
        assert_eq!(html, "<p>hi</p><script></script>");
    }
}
