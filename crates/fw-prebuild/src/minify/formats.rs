use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Html,
    Css,
    Js,
}

impl AssetKind {
    /// Processing order of the pipeline.
    pub const ALL: [AssetKind; 3] = [AssetKind::Html, AssetKind::Css, AssetKind::Js];

    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::Html => "html",
            AssetKind::Css => "css",
            AssetKind::Js => "js",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlOptions {
    #[serde(default = "default_true")]
    pub do_not_minify_doctype: bool,
    #[serde(default = "default_true")]
    pub ensure_spec_compliant_unquoted_attribute_values: bool,
    #[serde(default = "default_true")]
    pub keep_spaces_between_attributes: bool,
    #[serde(default = "default_true")]
    pub minify_css: bool,
    #[serde(default = "default_true")]
    pub minify_js: bool,
    pub keep_comments: bool,
    pub keep_closing_tags: bool,
    pub keep_html_and_head_opening_tags: bool,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            do_not_minify_doctype: true,
            ensure_spec_compliant_unquoted_attribute_values: true,
            keep_spaces_between_attributes: true,
            minify_css: true,
            minify_js: true,
            keep_comments: false,
            keep_closing_tags: false,
            keep_html_and_head_opening_tags: false,
        }
    }
}

impl HtmlOptions {
    fn to_cfg(&self) -> minify_html::Cfg {
        minify_html::Cfg {
            do_not_minify_doctype: self.do_not_minify_doctype,
            ensure_spec_compliant_unquoted_attribute_values: self
                .ensure_spec_compliant_unquoted_attribute_values,
            keep_spaces_between_attributes: self.keep_spaces_between_attributes,
            minify_css: self.minify_css,
            minify_js: self.minify_js,
            keep_comments: self.keep_comments,
            keep_closing_tags: self.keep_closing_tags,
            keep_html_and_head_opening_tags: self.keep_html_and_head_opening_tags,
            ..minify_html::Cfg::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CssOptions {
    /// Drop unparsable rules instead of failing the build.
    #[serde(default = "default_true")]
    pub error_recovery: bool,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            error_recovery: true,
        }
    }
}

fn leading_doctype(text: &str) -> Option<regex::Match<'_>> {
    static DOCTYPE: OnceLock<Option<Regex>> = OnceLock::new();
    DOCTYPE
        .get_or_init(|| Regex::new(r"(?i)\A\s*(<!doctype[^>]*>)").ok())
        .as_ref()?
        .captures(text)?
        .get(1)
}

pub fn minify_html(src: &str, opts: &HtmlOptions) -> Result<String> {
    let out = minify_html::minify(src.as_bytes(), &opts.to_cfg());
    let out =
        String::from_utf8(out).map_err(|_| Error::msg("html minifier produced invalid UTF-8"))?;
    if !opts.do_not_minify_doctype {
        return Ok(out);
    }
    // minify-html lowercases the doctype even when asked to leave it alone.
    match (leading_doctype(src), leading_doctype(&out)) {
        (Some(original), Some(minified)) => Ok(format!(
            "{}{}{}",
            &out[..minified.start()],
            original.as_str(),
            &out[minified.end()..]
        )),
        _ => Ok(out),
    }
}

pub fn minify_css(src: &str, opts: &CssOptions) -> Result<String> {
    let parser = ParserOptions {
        error_recovery: opts.error_recovery,
        ..ParserOptions::default()
    };
    let sheet =
        StyleSheet::parse(src, parser).map_err(|e| Error::msg(format!("css parse error: {e}")))?;
    let printed = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| Error::msg(format!("css print error: {e}")))?;
    Ok(printed.code)
}

pub fn minify_js(src: &str) -> Result<String> {
    Ok(minifier::js::minify(src).to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn kinds_from_extension() {
        assert_eq!(AssetKind::from_path(Path::new("a/b/index.html")), Some(AssetKind::Html));
        assert_eq!(AssetKind::from_path(Path::new("style.css")), Some(AssetKind::Css));
        assert_eq!(AssetKind::from_path(Path::new("app.js")), Some(AssetKind::Js));
        assert_eq!(AssetKind::from_path(Path::new("favicon.ico")), None);
        assert_eq!(AssetKind::from_path(Path::new("INDEX.HTML")), None);
    }

    #[test]
    fn html_keeps_doctype_and_collapses_whitespace() {
        let out = minify_html(
            "<!DOCTYPE html><div   class=\"a\">Hi</div>",
            &HtmlOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "<!DOCTYPE html><div class=a>Hi</div>");
    }

    #[test]
    fn doctype_is_kept_as_written() {
        let out = minify_html(
            "\n<!DocType HTML>\n<html><body><p>  x  </p></body></html>",
            &HtmlOptions::default(),
        )
        .unwrap();
        assert!(out.trim_start().starts_with("<!DocType HTML>"), "got: {out}");
        assert_eq!(out.matches("<!").count(), 1, "got: {out}");
    }

    #[test]
    fn doctype_follows_minifier_when_not_preserved() {
        let opts = HtmlOptions {
            do_not_minify_doctype: false,
            ..HtmlOptions::default()
        };
        let out = minify_html("<!DOCTYPE html><p>x</p>", &opts).unwrap();
        assert!(!out.contains("<!DOCTYPE html>"), "got: {out}");
    }

    #[test]
    fn markup_without_doctype_is_untouched_by_splice() {
        let out = minify_html("<p>  a  </p>", &HtmlOptions::default()).unwrap();
        assert!(!out.contains("<!"), "got: {out}");
    }

    #[test]
    fn css_strips_comments_and_whitespace() {
        let out = minify_css(
            "/* header */\nbody {\n  color: red;\n}\n",
            &CssOptions::default(),
        )
        .unwrap();
        assert!(!out.contains("header"), "got: {out}");
        assert!(!out.contains('\n'), "got: {out}");
        assert!(out.starts_with("body{"), "got: {out}");
    }

    #[test]
    fn js_strips_comments() {
        let src = "// note\nvar  a = 1;\n/* block */\nfunction f() {\n  return a;\n}\n";
        let out = minify_js(src).unwrap();
        assert!(!out.contains("note"), "got: {out}");
        assert!(!out.contains("block"), "got: {out}");
        assert!(out.contains("return a"), "got: {out}");
        assert!(out.len() < src.len(), "got: {out}");
    }
}
