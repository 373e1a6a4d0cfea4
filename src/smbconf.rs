//! Line-level model of the Samba configuration file.
//!
//! The file is treated as a flat sequence of `[section]` blocks. Only the
//! blocks this tool writes are ever edited; every other line, including the
//! `[global]` section, is carried through byte for byte.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const SHARE_COMMENT: &str = "NFSv3 share re-exported over SMB";

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]*)\]").expect("valid section regex"));

// Exactly one '=' on the line.
static PATH_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*path\s*=\s*([^=]*)$").expect("valid path regex"));

/// One share block as written by this tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRecord {
    pub name: String,
    pub path: String,
}

impl ShareRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The six lines of the block, each terminated by `\n`.
    pub fn render(&self) -> String {
        format!(
            "[{}]\ncomment = {}\npath = {}\nread only = no\nguest ok = yes\nbrowseable = yes\n",
            self.name, SHARE_COMMENT, self.path
        )
    }
}

/// A section found while listing the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareEntry {
    pub name: String,
    pub path: Option<String>,
}

/// Inclusive line range of a share block plus the `path` it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSpan {
    pub start: usize,
    pub end: usize,
    pub path: Option<String>,
}

#[derive(Debug)]
enum ScanState {
    Searching,
    InBlock { start: usize, path: Option<String> },
}

pub fn header_for(name: &str) -> String {
    format!("[{}]", name)
}

/// Splits the file into lines that keep their terminators, so that joining
/// any subset reproduces the original bytes.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn content(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn is_header(line: &str) -> bool {
    SECTION_HEADER.is_match(content(line))
}

fn section_name(line: &str) -> Option<&str> {
    SECTION_HEADER
        .captures(content(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn path_value(line: &str) -> Option<String> {
    PATH_FIELD
        .captures(content(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
}

/// True if a line equal to `[name]` exists anywhere in the file.
pub fn contains_share(lines: &[&str], name: &str) -> bool {
    let header = header_for(name);
    lines.iter().any(|line| content(line).trim() == header)
}

/// Locates the block headed by `[name]`.
///
/// The block closes at the line before the next header that is not itself
/// `[name]`, or at the last line of the file. Within the block the last
/// `path = ...` line wins.
pub fn locate_share(lines: &[&str], name: &str) -> Option<ShareSpan> {
    let header = header_for(name);
    let mut state = ScanState::Searching;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = content(line).trim();
        state = match state {
            ScanState::Searching if trimmed == header => ScanState::InBlock {
                start: idx,
                path: None,
            },
            ScanState::Searching => ScanState::Searching,
            ScanState::InBlock { start, path } if is_header(line) && trimmed != header => {
                return Some(ShareSpan {
                    start,
                    end: idx - 1,
                    path,
                });
            }
            ScanState::InBlock { start, path } => ScanState::InBlock {
                start,
                path: path_value(line).or(path),
            },
        };
    }

    match state {
        ScanState::InBlock { start, path } => Some(ShareSpan {
            start,
            end: lines.len() - 1,
            path,
        }),
        ScanState::Searching => None,
    }
}

/// Returns the file with `record` appended as a new block.
pub fn append_share(text: &str, record: &ShareRecord) -> String {
    let mut out = String::with_capacity(text.len() + 128);
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&record.render());
    out
}

/// Returns the file with lines `span.start..=span.end` removed.
pub fn remove_span(lines: &[&str], span: &ShareSpan) -> String {
    lines
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx < span.start || *idx > span.end)
        .map(|(_, line)| *line)
        .collect()
}

/// Every section other than `[global]`, in file order.
pub fn list_shares(lines: &[&str]) -> Vec<ShareEntry> {
    let mut entries: Vec<ShareEntry> = Vec::new();
    let mut current: Option<ShareEntry> = None;

    for line in lines {
        if let Some(name) = section_name(line) {
            entries.extend(current.take());
            if !name.trim().eq_ignore_ascii_case("global") {
                current = Some(ShareEntry {
                    name: name.trim().to_string(),
                    path: None,
                });
            }
        } else if let Some(entry) = current.as_mut() {
            if let Some(path) = path_value(line) {
                entry.path = Some(path);
            }
        }
    }
    entries.extend(current);
    entries
}
