//! Include-guard injection for vendored C headers.
//!
//! A definition line is any line that starts (after optional whitespace) with
//! `#define` followed by the macro name. The name is matched as a prefix, so
//! `MAX_SOCK_NUM` also matches `#define MAX_SOCK_NUM_EXTRA`. That over-match
//! is intentional and kept stable across releases.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use regex::bytes::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The header does not exist.
    Missing,
    /// Nothing needed a guard; the file was not written.
    Unchanged,
    /// `count` definitions were wrapped in `#ifndef`/`#endif`.
    Guarded { count: usize },
}

pub struct MacroGuard {
    name: String,
    define: Regex,
    ifndef: Regex,
}

impl MacroGuard {
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::msg("macro name is empty"));
        }
        let escaped = regex::escape(name);
        Ok(Self {
            name: name.to_string(),
            define: Regex::new(&format!(r"^\s*#define\s+{escaped}"))?,
            ifndef: Regex::new(&format!(r"^\s*#ifndef\s+{escaped}"))?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indices of definition lines without a guard directly above them.
    pub fn unguarded(&self, lines: &[&[u8]]) -> Vec<usize> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| self.define.is_match(line))
            .filter(|(i, _)| {
                let prev = i.checked_sub(1).and_then(|p| lines.get(p));
                !prev.is_some_and(|p| self.ifndef.is_match(p))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the patched content, or `None` when nothing needs a guard.
    pub fn apply(&self, content: &[u8]) -> Option<(Vec<u8>, usize)> {
        let lines: Vec<&[u8]> = content.split_inclusive(|b| *b == b'\n').collect();
        let indexes = self.unguarded(&lines);
        if indexes.is_empty() {
            return None;
        }

        let mut out: Vec<Vec<u8>> = lines.iter().map(|l| l.to_vec()).collect();
        // Descending so earlier insertions don't shift pending indices.
        for &i in indexes.iter().rev() {
            let eol = line_ending(&out[i]);
            if !out[i].ends_with(b"\n") {
                out[i].extend_from_slice(eol);
            }
            let mut endif = b"#endif".to_vec();
            endif.extend_from_slice(eol);
            let mut ifndef = format!("#ifndef {}", self.name).into_bytes();
            ifndef.extend_from_slice(eol);

            out.insert(i + 1, endif);
            out.insert(i, ifndef);
        }
        Some((out.concat(), indexes.len()))
    }
}

fn line_ending(line: &[u8]) -> &'static [u8] {
    if line.ends_with(b"\r\n") {
        b"\r\n"
    } else {
        b"\n"
    }
}

/// Wraps every unguarded `#define <name>` in `path` with an `#ifndef` guard.
///
/// Best effort: a missing file or a file without matches is left alone.
pub fn guard_macro(path: &Path, name: &str) -> Result<PatchOutcome> {
    let guard = MacroGuard::new(name)?;
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "header missing; skipping");
            return Ok(PatchOutcome::Missing);
        }
        Err(e) => {
            return Err(Error::msg(format!("failed to read {}: {e}", path.display())));
        }
    };

    let Some((patched, count)) = guard.apply(&content) else {
        return Ok(PatchOutcome::Unchanged);
    };
    fs::write(path, patched)
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), name, count, "guarded macro definitions");
    Ok(PatchOutcome::Guarded { count })
}
