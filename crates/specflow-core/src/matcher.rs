use serde::{Deserialize, Serialize};

/// Boundary characters that delimit a dotted task id inside a checklist line.
///
/// Start and end of line always count as boundaries. A `.` directly followed
/// by a digit never terminates an id, because it continues the dotted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMatcher {
    pub leading: Vec<char>,
    pub trailing: Vec<char>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Characters allowed immediately before an id (whitespace always counts).
    pub leading: String,
    /// Characters allowed immediately after an id (whitespace always counts).
    pub trailing: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            leading: "-*+([]".to_string(),
            trailing: ".:)]".to_string(),
        }
    }
}

impl Default for IdMatcher {
    fn default() -> Self {
        IdMatcher::from(&MatcherConfig::default())
    }
}

impl From<&MatcherConfig> for IdMatcher {
    fn from(config: &MatcherConfig) -> Self {
        Self {
            leading: config.leading.chars().collect(),
            trailing: config.trailing.chars().collect(),
        }
    }
}

impl IdMatcher {
    pub fn is_leading_boundary(&self, ch: char) -> bool {
        ch.is_whitespace() || self.leading.contains(&ch)
    }

    /// `next` is the character after `ch`, used to keep `1.1` from ending at its dot.
    pub fn is_trailing_boundary(&self, ch: char, next: Option<char>) -> bool {
        if ch == '.' && next.map(|c| c.is_ascii_digit()).unwrap_or(false) {
            return false;
        }
        ch.is_whitespace() || self.trailing.contains(&ch)
    }

    /// Reads a dotted id starting exactly at byte offset `pos`.
    ///
    /// Returns the id and the byte offset just past it. Leading whitespace is
    /// not skipped; the caller positions `pos` on the first digit.
    pub fn read_id_at(&self, line: &str, pos: usize) -> Option<(String, usize)> {
        let rest = line.get(pos..)?;
        if let Some(prev) = line[..pos].chars().next_back() {
            if !self.is_leading_boundary(prev) {
                return None;
            }
        }
        let end = dotted_run_len(rest);
        if end == 0 {
            return None;
        }
        let after: Vec<char> = rest[end..].chars().take(2).collect();
        match after.first() {
            None => {}
            Some(&ch) => {
                if !self.is_trailing_boundary(ch, after.get(1).copied()) {
                    return None;
                }
            }
        }
        Some((rest[..end].to_string(), pos + end))
    }

    /// Reads the dotted id that ends right before byte offset `pos`, allowing
    /// whitespace and trailing delimiters between the id and `pos`.
    ///
    /// Returns the id and the byte offset where it starts.
    pub fn read_id_before(&self, line: &str, pos: usize) -> Option<(String, usize)> {
        let head = line.get(..pos)?;
        let trimmed = head.trim_end_matches(|ch: char| {
            ch.is_whitespace() || (ch != '.' && self.trailing.contains(&ch))
        });
        let trimmed = trimmed.trim_end_matches('.');
        let digits_start = trimmed
            .char_indices()
            .rev()
            .take_while(|(_, ch)| ch.is_ascii_digit() || *ch == '.')
            .last()
            .map(|(idx, _)| idx)?;
        let token = trimmed[digits_start..].trim_start_matches('.');
        let start = trimmed.len() - token.len();
        let (id, _) = self.read_id_at(line, start)?;
        if id != token {
            return None;
        }
        Some((id, start))
    }

    /// Byte offset of the first bounded occurrence of `id` in `line`.
    pub fn find_id(&self, line: &str, id: &str) -> Option<usize> {
        if id.is_empty() {
            return None;
        }
        line.match_indices(id).map(|(idx, _)| idx).find(|&idx| {
            self.read_id_at(line, idx)
                .map(|(found, _)| found == id)
                .unwrap_or(false)
        })
    }
}

/// Length in bytes of the `\d+(\.\d+)*` run at the start of `text`.
fn dotted_run_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut idx = 0;
    loop {
        let seg_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == seg_start {
            return end;
        }
        end = idx;
        if idx + 1 < bytes.len() && bytes[idx] == b'.' && bytes[idx + 1].is_ascii_digit() {
            idx += 1;
            continue;
        }
        return end;
    }
}
