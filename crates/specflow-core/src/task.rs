use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::matcher::IdMatcher;

/// A checklist item recovered from the tasks document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Task>,
    #[serde(default)]
    pub synthetic: bool,
    /// 0-based source line, `None` for synthetic roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Task {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn depth(&self) -> usize {
        task_depth(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkbox {
    Unchecked,
    Checked,
    CheckedUpper,
}

impl Checkbox {
    pub const ALL: [Checkbox; 3] = [Checkbox::Unchecked, Checkbox::Checked, Checkbox::CheckedUpper];

    pub fn glyph(self) -> &'static str {
        match self {
            Checkbox::Unchecked => "[ ]",
            Checkbox::Checked => "[x]",
            Checkbox::CheckedUpper => "[X]",
        }
    }

    pub fn is_checked(self) -> bool {
        !matches!(self, Checkbox::Unchecked)
    }
}

/// One checkbox line that carried a recognisable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub line: usize,
    pub id: String,
    pub title: String,
    pub checkbox: Checkbox,
    /// Byte offset of the glyph inside the line.
    pub glyph_at: usize,
}

/// Finds the earliest checkbox glyph in `line`.
pub fn find_checkbox(line: &str) -> Option<(Checkbox, usize)> {
    Checkbox::ALL
        .iter()
        .filter_map(|checkbox| line.find(checkbox.glyph()).map(|idx| (*checkbox, idx)))
        .min_by_key(|(_, idx)| *idx)
}

pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .split('.')
            .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

pub fn task_depth(id: &str) -> usize {
    id.split('.').count()
}

/// Root id a dotted id attaches under; `None` for roots.
pub fn parent_task_id(id: &str) -> Option<&str> {
    id.split_once('.').map(|(root, _)| root)
}

/// Segment-wise numeric comparison; a shorter prefix sorts first.
pub fn compare_task_ids(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = compare_segment(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => {
            let l = a.trim_start_matches('0');
            let r = b.trim_start_matches('0');
            l.len().cmp(&r.len()).then_with(|| l.cmp(r))
        }
    }
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Phase one: every checkbox line with an adjacent id, in document order.
pub fn scan_task_lines(text: &str, matcher: &IdMatcher) -> Vec<TaskLine> {
    let lines: Vec<&str> = text.lines().collect();
    let mut scanned = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some((checkbox, glyph_at)) = find_checkbox(line) else {
            continue;
        };
        let Some((id, mut title)) = scan_id_and_title(line, glyph_at, checkbox, matcher) else {
            tracing::debug!(line = idx + 1, "checkbox without task id ignored");
            continue;
        };
        if title.is_empty() {
            if let Some(next) = lines.get(idx + 1) {
                if find_checkbox(next).is_none() && !is_heading(next) {
                    title = next.trim().to_string();
                }
            }
        }
        scanned.push(TaskLine {
            line: idx,
            id,
            title,
            checkbox,
            glyph_at,
        });
    }
    scanned
}

fn scan_id_and_title(
    line: &str,
    glyph_at: usize,
    checkbox: Checkbox,
    matcher: &IdMatcher,
) -> Option<(String, String)> {
    let after_glyph = glyph_at + checkbox.glyph().len();
    let rest = &line[after_glyph..];
    let id_at = after_glyph + (rest.len() - rest.trim_start().len());
    if let Some((id, end)) = matcher.read_id_at(line, id_at) {
        let title = strip_id_suffix(&line[end..], matcher);
        return Some((id, title));
    }
    if let Some((id, _)) = matcher.read_id_before(line, glyph_at) {
        return Some((id, rest.trim().to_string()));
    }
    None
}

fn strip_id_suffix(text: &str, matcher: &IdMatcher) -> String {
    text.trim_start_matches(|ch: char| ch.is_whitespace() || matcher.trailing.contains(&ch))
        .trim()
        .to_string()
}

pub fn parse_tasks(text: &str) -> Vec<Task> {
    parse_tasks_with(text, &IdMatcher::default())
}

/// Parses the checklist into a forest of roots. Never fails; text without
/// recognisable task lines yields an empty forest.
pub fn parse_tasks_with(text: &str, matcher: &IdMatcher) -> Vec<Task> {
    let scanned = scan_task_lines(text, matcher);
    assemble(text, scanned)
}

fn assemble(text: &str, scanned: Vec<TaskLine>) -> Vec<Task> {
    let mut roots: Vec<Task> = Vec::new();
    let mut children: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    let mut child_order: Vec<String> = Vec::new();

    for entry in scanned {
        let task = Task {
            id: entry.id.clone(),
            title: entry.title,
            completed: entry.checkbox.is_checked(),
            children: Vec::new(),
            synthetic: false,
            line: Some(entry.line),
        };
        match parent_task_id(&entry.id) {
            None => roots.push(task),
            Some(root) => {
                let root = root.to_string();
                if !children.contains_key(&root) {
                    child_order.push(root.clone());
                }
                children.entry(root).or_default().push(task);
            }
        }
    }

    for root_id in child_order {
        let Some(mut group) = children.remove(&root_id) else {
            continue;
        };
        group.sort_by(|a, b| compare_task_ids(&a.id, &b.id));
        match roots.iter_mut().find(|root| root.id == root_id) {
            Some(root) => root.children = group,
            None => {
                tracing::debug!(id = %root_id, "synthesizing missing parent task");
                roots.push(Task {
                    title: synthetic_title(text, &root_id),
                    id: root_id,
                    completed: false,
                    children: group,
                    synthetic: true,
                    line: None,
                });
            }
        }
    }

    for root in roots.iter_mut() {
        if root.has_children() {
            root.completed = root.children.iter().all(|child| child.completed);
        }
    }
    roots.sort_by(|a, b| compare_task_ids(&a.id, &b.id));
    roots
}

fn synthetic_title(text: &str, id: &str) -> String {
    let pattern = format!(
        r"(?m)^[ \t]*(?:#{{1,6}}[ \t]*|\*\*[ \t]*){}\.(?:[ \t]*$|[ \t]+(.*?)[ \t]*(?:\*\*)?[ \t]*$)",
        regex::escape(id)
    );
    let title = Regex::new(&pattern)
        .ok()
        .and_then(|re| {
            re.captures(text)
                .and_then(|cap| cap.get(1))
                .map(|m| m.as_str().trim().trim_end_matches('*').trim().to_string())
        })
        .filter(|title| !title.is_empty());
    title.unwrap_or_else(|| format!("Task Group {}", id))
}

/// Depth-first search; the first textual match wins for duplicate ids.
pub fn find_task<'a>(tasks: &'a [Task], id: &str) -> Option<&'a Task> {
    for task in tasks {
        if task.id == id {
            return Some(task);
        }
        if let Some(found) = find_task(&task.children, id) {
            return Some(found);
        }
    }
    None
}
