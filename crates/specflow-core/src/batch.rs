use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use thiserror::Error;

use crate::matcher::IdMatcher;
use crate::next_task::get_first_uncompleted_task;
use crate::task::{
    compare_task_ids, find_task, is_valid_task_id, parent_task_id, parse_tasks_with,
    scan_task_lines, task_depth, Checkbox, Task, TaskLine,
};

/// Id reported on the single rejection emitted when a batch is rolled back.
pub const BATCH_REJECTION_ID: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    NotFound,
    HasUncompletedSubtasks,
    InternalMutationFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub id: String,
    pub reason: RejectReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    /// Requested ids that became complete, in the order they were applied.
    pub completed: Vec<String>,
    /// Parents checked because their last open child was completed.
    pub auto_completed: Vec<String>,
    pub already_completed: Vec<String>,
    pub rejected: Vec<Rejection>,
    pub updated_text: String,
    /// Advisory: first open task in `updated_text`.
    pub next_task: Option<Task>,
}

impl BatchResult {
    pub fn changed(&self, original: &str) -> bool {
        self.success && self.updated_text != original
    }
}

#[derive(Debug, Error)]
enum MutationError {
    #[error("task {0} disappeared while the batch was applied")]
    Vanished(String),
    #[error("task {0} has no checkbox line")]
    LineMissing(String),
    #[error("checkbox line for task {0} could not be flipped")]
    Unflippable(String),
    #[error("task {0} is not complete after its line was flipped")]
    NotCompleted(String),
}

/// Splits a comma or whitespace separated id list, e.g. `"1.1, 1.2"`.
pub fn parse_id_list(input: &str) -> Vec<String> {
    input
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn complete_task(document: &str, id: &str) -> BatchResult {
    complete_batch(document, &[id])
}

pub fn complete_batch<S: AsRef<str>>(document: &str, ids: &[S]) -> BatchResult {
    complete_batch_with(document, ids, &IdMatcher::default())
}

/// Marks every id in `ids` complete, or none of them.
///
/// Preconditions are checked against the current document first. Any
/// `NotFound` or `HasUncompletedSubtasks` rejection leaves the document
/// untouched. Eligible ids are applied deepest first; each flip is followed by
/// a reparse so parents can auto-complete as their last child closes.
pub fn complete_batch_with<S: AsRef<str>>(
    document: &str,
    ids: &[S],
    matcher: &IdMatcher,
) -> BatchResult {
    let requested = normalize_ids(ids);
    let tree = parse_tasks_with(document, matcher);
    let plan = plan_batch(&tree, &requested);

    if !plan.rejected.is_empty() {
        tracing::warn!(
            rejected = plan.rejected.len(),
            "batch rejected, document left unchanged"
        );
        return BatchResult {
            success: false,
            completed: Vec::new(),
            auto_completed: Vec::new(),
            already_completed: plan.already_completed,
            rejected: plan.rejected,
            updated_text: document.to_string(),
            next_task: None,
        };
    }

    if plan.eligible.is_empty() {
        return BatchResult {
            success: true,
            completed: Vec::new(),
            auto_completed: Vec::new(),
            already_completed: plan.already_completed,
            rejected: Vec::new(),
            updated_text: document.to_string(),
            next_task: get_first_uncompleted_task(&tree).cloned(),
        };
    }

    match apply(document, &plan.eligible, matcher) {
        Ok(applied) => {
            let tree = parse_tasks_with(&applied.text, matcher);
            tracing::debug!(
                completed = applied.completed.len(),
                auto_completed = applied.auto_completed.len(),
                "batch applied"
            );
            BatchResult {
                success: true,
                completed: applied.completed,
                auto_completed: applied.auto_completed,
                already_completed: plan.already_completed,
                rejected: Vec::new(),
                next_task: get_first_uncompleted_task(&tree).cloned(),
                updated_text: applied.text,
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "batch rolled back");
            BatchResult {
                success: false,
                completed: Vec::new(),
                auto_completed: Vec::new(),
                already_completed: plan.already_completed,
                rejected: vec![Rejection {
                    id: BATCH_REJECTION_ID.to_string(),
                    reason: RejectReason::InternalMutationFailure,
                    detail: Some(err.to_string()),
                }],
                updated_text: document.to_string(),
                next_task: None,
            }
        }
    }
}

fn normalize_ids<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.as_ref().trim().to_string())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

struct BatchPlan {
    eligible: Vec<String>,
    already_completed: Vec<String>,
    rejected: Vec<Rejection>,
}

fn plan_batch(tree: &[Task], requested: &[String]) -> BatchPlan {
    let mut rejected = Vec::new();
    let mut already_completed = Vec::new();
    let mut candidates: Vec<&Task> = Vec::new();

    for id in requested {
        if !is_valid_task_id(id) {
            rejected.push(Rejection {
                id: id.clone(),
                reason: RejectReason::NotFound,
                detail: Some("not a dotted numeric task id".to_string()),
            });
            continue;
        }
        match find_task(tree, id) {
            None => rejected.push(Rejection {
                id: id.clone(),
                reason: RejectReason::NotFound,
                detail: None,
            }),
            Some(task) if task.completed => already_completed.push(id.clone()),
            Some(task) => candidates.push(task),
        }
    }

    // Open children requested in the same batch will be closed first.
    let covered: HashSet<String> = candidates.iter().map(|task| task.id.clone()).collect();
    let mut eligible = Vec::new();
    for task in candidates {
        let open: Vec<&str> = task
            .children
            .iter()
            .filter(|child| !child.completed && !covered.contains(child.id.as_str()))
            .map(|child| child.id.as_str())
            .collect();
        if open.is_empty() {
            eligible.push(task.id.clone());
        } else {
            rejected.push(Rejection {
                id: task.id.clone(),
                reason: RejectReason::HasUncompletedSubtasks,
                detail: Some(format!("open subtasks: {}", open.join(", "))),
            });
        }
    }

    eligible.sort_by(|a, b| {
        task_depth(b)
            .cmp(&task_depth(a))
            .then_with(|| compare_task_ids(a, b))
    });

    BatchPlan {
        eligible,
        already_completed,
        rejected,
    }
}

struct Applied {
    text: String,
    completed: Vec<String>,
    auto_completed: Vec<String>,
}

fn apply(document: &str, eligible: &[String], matcher: &IdMatcher) -> Result<Applied, MutationError> {
    let mut text = document.to_string();
    let mut queue: VecDeque<(String, bool)> =
        eligible.iter().map(|id| (id.clone(), false)).collect();
    let mut done: HashSet<String> = HashSet::new();
    let mut completed = Vec::new();
    let mut auto_completed = Vec::new();

    while let Some((id, auto)) = queue.pop_front() {
        let tree = parse_tasks_with(&text, matcher);
        let task = find_task(&tree, &id).ok_or_else(|| MutationError::Vanished(id.clone()))?;
        if !task.synthetic {
            let entry = locate_task_line(&text, &id, matcher)
                .ok_or_else(|| MutationError::LineMissing(id.clone()))?;
            if !entry.checkbox.is_checked() {
                text = flip_checkbox(&text, &entry, matcher)?;
            } else if !task.has_children() {
                return Err(MutationError::Unflippable(id));
            }
        }

        let tree = parse_tasks_with(&text, matcher);
        let task = find_task(&tree, &id).ok_or_else(|| MutationError::Vanished(id.clone()))?;
        let line_checked = task.synthetic
            || locate_task_line(&text, &id, matcher)
                .map(|entry| entry.checkbox.is_checked())
                .unwrap_or(false);
        if !task.completed || !line_checked {
            return Err(MutationError::NotCompleted(id));
        }
        tracing::debug!(id = %id, auto, "task checked");

        if let Some(parent_id) = parent_task_id(&id) {
            let queued = queue.iter().any(|(queued, _)| queued == parent_id);
            if !queued && !done.contains(parent_id) && parent_ready(&tree, &text, parent_id, matcher) {
                queue.push_back((parent_id.to_string(), true));
            }
        }

        if auto {
            auto_completed.push(id.clone());
        } else {
            completed.push(id.clone());
        }
        done.insert(id);
    }

    Ok(Applied {
        text,
        completed,
        auto_completed,
    })
}

/// A parent auto-completes once every child is checked and its own line is not.
fn parent_ready(tree: &[Task], text: &str, parent_id: &str, matcher: &IdMatcher) -> bool {
    let Some(parent) = find_task(tree, parent_id) else {
        return false;
    };
    if parent.synthetic || !parent.children.iter().all(|child| child.completed) {
        return false;
    }
    locate_task_line(text, parent_id, matcher)
        .map(|entry| !entry.checkbox.is_checked())
        .unwrap_or(false)
}

/// First checkbox line, in document order, whose id token is exactly `id`.
pub fn locate_task_line(text: &str, id: &str, matcher: &IdMatcher) -> Option<TaskLine> {
    scan_task_lines(text, matcher)
        .into_iter()
        .find(|entry| entry.id == id)
}

fn flip_checkbox(text: &str, entry: &TaskLine, matcher: &IdMatcher) -> Result<String, MutationError> {
    let open = Checkbox::Unchecked.glyph();
    let mut out = String::with_capacity(text.len());
    let mut flipped = false;
    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        if idx != entry.line {
            out.push_str(raw);
            continue;
        }
        let at = entry.glyph_at;
        if raw.get(at..at + open.len()) != Some(open) || matcher.find_id(raw, &entry.id).is_none() {
            return Err(MutationError::Unflippable(entry.id.clone()));
        }
        out.push_str(&raw[..at]);
        out.push_str(Checkbox::Checked.glyph());
        out.push_str(&raw[at + open.len()..]);
        flipped = true;
    }
    if !flipped {
        return Err(MutationError::LineMissing(entry.id.clone()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_id_list_accepts_commas_and_spaces() {
        assert_eq!(parse_id_list("1.1, 1.2  2"), vec!["1.1", "1.2", "2"]);
        assert!(parse_id_list(" , ").is_empty());
    }

    #[test]
    fn normalize_ids_trims_and_dedupes() {
        assert_eq!(normalize_ids(&[" 1.1", "1.1", "", "2"]), vec!["1.1", "2"]);
    }

    #[test]
    fn plan_orders_deepest_first() {
        let tree = crate::task::parse_tasks(
            "- [ ] 1. A\n- [ ] 1.1 B\n- [ ] 1.2 C\n- [ ] 1.2.1 D\n- [ ] 2. E\n",
        );
        let requested: Vec<String> = ["2", "1.1", "1.2.1", "1.2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let plan = plan_batch(&tree, &requested);
        assert!(plan.rejected.is_empty());
        assert_eq!(plan.eligible, vec!["1.2.1", "1.1", "1.2", "2"]);
    }

    #[test]
    fn flip_preserves_crlf_and_surrounding_text() {
        let text = "# Tasks\r\n- [ ] 1. One\r\n- [ ] 2. Two\r\n";
        let matcher = IdMatcher::default();
        let entry = locate_task_line(text, "2", &matcher).expect("line");
        let flipped = flip_checkbox(text, &entry, &matcher).expect("flip");
        assert_eq!(flipped, "# Tasks\r\n- [ ] 1. One\r\n- [x] 2. Two\r\n");
    }

    #[test]
    fn flip_refuses_checked_line() {
        let matcher = IdMatcher::default();
        let text = "- [x] 1. Done\n";
        let entry = TaskLine {
            line: 0,
            id: "1".to_string(),
            title: "Done".to_string(),
            checkbox: Checkbox::Unchecked,
            glyph_at: 2,
        };
        let err = flip_checkbox(text, &entry, &matcher).expect_err("should fail");
        assert!(matches!(err, MutationError::Unflippable(_)));
    }

    #[test]
    fn flip_reports_missing_line() {
        let matcher = IdMatcher::default();
        let text = "- [ ] 1. One\n- [ ] 2. Two\n";
        let stale = TaskLine {
            line: 5,
            id: "2".to_string(),
            title: "Two".to_string(),
            checkbox: Checkbox::Unchecked,
            glyph_at: 2,
        };
        let err = flip_checkbox(text, &stale, &matcher).expect_err("should fail");
        assert!(matches!(err, MutationError::LineMissing(_)));
    }
}
