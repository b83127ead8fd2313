//! Source discovery.
//!
//! A pattern is a directory followed by a file-name pattern where `*`
//! matches any run of characters and `?` matches one character. Files whose
//! names start with [`DONE_PREFIX`] have already been loaded and are never
//! listed.

use std::path::{Path, PathBuf};

use regex::Regex;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::error::{DiscoverySnafu, InvalidPatternSnafu, PipelineError};

/// Marker prepended to the file name of an accepted source.
pub const DONE_PREFIX: char = '.';

/// List source files matching `pattern`, sorted by path.
///
/// Wildcards are only interpreted in the file-name part. A missing directory
/// yields an empty list.
pub fn list_sources(pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let pattern_path = Path::new(pattern);
    let dir = match pattern_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_pattern = pattern_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "*".to_string());

    let matcher = Regex::new(&wildcard_to_regex(&name_pattern))
        .context(InvalidPatternSnafu { pattern })?;

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Source directory does not exist");
            return Ok(Vec::new());
        }
        Err(source) => return Err(PipelineError::Discovery { dir, source }),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.context(DiscoverySnafu { dir: &dir })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with(DONE_PREFIX) || !matcher.is_match(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    debug!(pattern, count = files.len(), "Listed source files");
    Ok(files)
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}
