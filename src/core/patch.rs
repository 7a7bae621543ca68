//! Line-oriented text patching
//!
//! Applies `sed`-like edits to bootloader configuration text. A line is
//! eligible when it contains the match token as a literal substring; on
//! eligible lines every literal occurrence of the search text is replaced.
//! No patterns are interpreted and no lines are added or removed.

use serde::Serialize;

/// A single match-and-replace edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineEdit {
    /// Substring a line must contain to be edited (empty matches every line)
    pub match_token: String,
    /// Literal text to replace
    pub search: String,
    /// Replacement text
    pub replace: String,
}

impl LineEdit {
    /// Create a new edit
    pub fn new(
        match_token: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self {
            match_token: match_token.into(),
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// Apply this edit to `content`
    pub fn apply(&self, content: &str) -> PatchOutcome {
        apply(content, &self.match_token, &self.search, &self.replace)
    }
}

/// Result of patching a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Reconstructed text
    pub content: String,
    /// Lines containing the match token
    pub lines_matched: usize,
    /// Lines whose text actually changed
    pub lines_changed: usize,
}

impl PatchOutcome {
    /// True when the text is unchanged
    pub fn is_noop(&self) -> bool {
        self.lines_changed == 0
    }
}

/// Patch every line of `content` that contains `match_token`
///
/// Line terminators (`\n` or `\r\n`) are preserved and never take part in
/// matching or replacement. An empty `search` inserts `replace` at the
/// start of each eligible line.
pub fn apply(content: &str, match_token: &str, search: &str, replace: &str) -> PatchOutcome {
    let mut out = String::with_capacity(content.len());
    let mut lines_matched = 0;
    let mut lines_changed = 0;

    for line in content.split_inclusive('\n') {
        let (body, terminator) = split_terminator(line);

        if !body.contains(match_token) {
            out.push_str(line);
            continue;
        }
        lines_matched += 1;

        let changed = if search.is_empty() {
            format!("{replace}{body}")
        } else {
            body.replace(search, replace)
        };

        if changed != body {
            lines_changed += 1;
        }
        out.push_str(&changed);
        out.push_str(terminator);
    }

    PatchOutcome {
        content: out,
        lines_matched,
        lines_changed,
    }
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}
