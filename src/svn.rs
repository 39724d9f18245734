//! Parser for the textual output of `svn log --diff`.
//!
//! The log is a sequence of commit blocks separated by a line of 72 dashes.
//! Each block looks like:
//!
//! ```text
//! r5 | alice | 2021-01-01 10:00:00 +0000 (Fri, 01 Jan 2021) | 1 line
//!
//! Fix the build
//!
//! Index: src/main.c
//! ===================================================================
//! --- src/main.c	(revision 4)
//! +++ src/main.c	(revision 5)
//! @@ -1,3 +1,4 @@
//! +int retries = 3;
//! ```
//!
//! Blank lines carry no meaning, so all positions below count non-blank lines
//! only: the header is line 0, the message line 1 and the diff starts at line 4.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Line separating two commits in the log output.
pub const SEPARATOR_WIDTH: usize = 72;

const INDEX_PREFIX: &str = "Index: ";
const DIFF_START: usize = 4;

/// Single commit parsed from one log block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    rev: String,
    author: String,
    time: String,
    msg: String,
    #[serde(skip)]
    lines: Vec<String>,
    #[serde(skip)]
    raw: String,
}

impl Commit {
    pub fn parse(block: &str) -> Self {
        let lines: Vec<String> = block
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        let header: Vec<&str> = lines
            .first()
            .map(|h| h.split(" | ").filter(|p| !p.trim().is_empty()).collect())
            .unwrap_or_default();

        let rev = header
            .first()
            .map(|r| r.chars().skip(1).collect())
            .unwrap_or_default();

        Self {
            rev,
            author: header.get(1).map(|s| s.to_string()).unwrap_or_default(),
            time: header.get(2).map(|s| s.to_string()).unwrap_or_default(),
            msg: lines.get(1).cloned().unwrap_or_default(),
            raw: block.to_string(),
            lines,
        }
    }

    /// Revision number without the leading `r`
    pub fn rev(&self) -> &str {
        &self.rev
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    /// First line of the commit message
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Non-blank lines of the diff section
    pub fn diff_lines(&self) -> &[String] {
        self.lines.get(DIFF_START..).unwrap_or_default()
    }

    /// True when an added line contains any of the texts
    pub fn includes<S: AsRef<str>>(&self, texts: &[S]) -> bool {
        self.diff_lines()
            .iter()
            .any(|l| is_added_with(l, texts))
    }

    /// Files whose added lines contain any of the texts, first match first
    pub fn affected<S: AsRef<str>>(&self, texts: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for (occ, line) in self.lines.iter().enumerate().skip(DIFF_START) {
            if !is_added_with(line, texts) {
                continue;
            }
            let file = self.lines[2..=occ]
                .iter()
                .rev()
                .find_map(|l| l.strip_prefix(INDEX_PREFIX));
            if let Some(file) = file {
                if seen.insert(file) {
                    files.push(file.to_string());
                }
            }
        }

        files
    }

    /// Raw diff sections of the affected files, as lines
    pub fn diff<S: AsRef<str>>(&self, texts: &[S]) -> Vec<String> {
        let files = self.affected(texts);
        self.raw
            .split(INDEX_PREFIX)
            .filter(|section| files.iter().any(|f| section.starts_with(f.as_str())))
            .flat_map(|section| section.lines().map(str::to_string))
            .collect()
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.rev, self.msg)
    }
}

fn is_added_with<S: AsRef<str>>(line: &str, texts: &[S]) -> bool {
    line.starts_with('+') && texts.iter().any(|t| line.contains(t.as_ref()))
}

/// Parse the whole log output into commits, oldest first
pub fn parse_log(stdout: &str) -> Vec<Commit> {
    let separator = "-".repeat(SEPARATOR_WIDTH);
    let mut commits: Vec<Commit> = stdout
        .split(separator.as_str())
        .filter(|block| !block.trim().is_empty())
        .map(Commit::parse)
        .collect();
    commits.reverse();
    commits
}
