//! Output naming from path templates.
//!
//! Placeholders: `[name]`, `[ext]` (with the dot), `[contenthash]` and its
//! alias `[hash]`. A hash placeholder may carry a length, `[contenthash:8]`;
//! the default length is [`CONTENT_HASH_LEN`].

use std::path::{Component, Path};

use assetpipe_util::hash::{blake3_bytes, CONTENT_HASH_LEN};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Ext,
    Hash(usize),
}

/// A parsed output path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl OutputTemplate {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let invalid = |msg: String| Error::InvalidConfig(format!("output template `{raw}`: {msg}"));

        let mut segments = Vec::new();
        let mut rest = raw;
        while let Some(start) = rest.find('[') {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let end = rest[start..]
                .find(']')
                .map(|i| start + i)
                .ok_or_else(|| invalid("unclosed `[`".into()))?;
            let token = &rest[start + 1..end];

            let (key, len) = match token.split_once(':') {
                Some((key, len)) => {
                    let len: usize = len
                        .parse()
                        .map_err(|_| invalid(format!("bad hash length in `[{token}]`")))?;
                    if !(1..=64).contains(&len) {
                        return Err(invalid(format!("hash length must be 1..=64 in `[{token}]`")));
                    }
                    (key, Some(len))
                }
                None => (token, None),
            };

            segments.push(match (key, len) {
                ("name", None) => Segment::Name,
                ("ext", None) => Segment::Ext,
                ("contenthash" | "hash", len) => Segment::Hash(len.unwrap_or(CONTENT_HASH_LEN)),
                _ => return Err(invalid(format!("unknown placeholder `[{token}]`"))),
            });
            rest = &rest[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        if !stays_inside(raw) {
            return Err(invalid("must stay inside the output directory".into()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Whether the rendered path depends on the bytes.
    #[must_use]
    pub fn needs_hash(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Hash(_)))
    }

    /// Render a path. `ext` includes its leading dot, or is empty.
    #[must_use]
    pub fn render(&self, name: &str, ext: &str, bytes: &[u8]) -> String {
        let digest = self.needs_hash().then(|| blake3_bytes(bytes));
        let mut out = String::with_capacity(self.raw.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Name => out.push_str(name),
                Segment::Ext => out.push_str(ext),
                Segment::Hash(len) => {
                    if let Some(digest) = &digest {
                        out.push_str(&digest[..*len]);
                    }
                }
            }
        }
        out
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Whether a relative output path stays inside the output directory.
#[must_use]
pub fn stays_inside(rel: &str) -> bool {
    !rel.starts_with(['/', '\\'])
        && rel.split(['/', '\\']).all(|part| part != "..")
        && Path::new(rel)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Split a file name into stem and dotted extension: `logo.png` → (`logo`, `.png`).
#[must_use]
pub fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, ""),
        Some(i) => (&file_name[..i], &file_name[i..]),
    }
}
