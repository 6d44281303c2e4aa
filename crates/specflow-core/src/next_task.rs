use serde::Serialize;

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
}

impl TaskProgress {
    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

/// First actionable task, preferring an open child over its parent.
///
/// Roots are visited in their sorted order. A root is returned only when it
/// has no open children left but is itself still open.
pub fn get_first_uncompleted_task(tasks: &[Task]) -> Option<&Task> {
    for root in tasks {
        if root.has_children() {
            if let Some(child) = root.children.iter().find(|child| !child.completed) {
                return Some(child);
            }
            if !root.completed {
                return Some(root);
            }
        } else if !root.completed {
            return Some(root);
        }
    }
    None
}

/// Counts every task backed by a source line. Synthetic roots are skipped.
pub fn task_progress(tasks: &[Task]) -> TaskProgress {
    let mut progress = TaskProgress::default();
    accumulate(tasks, &mut progress);
    progress
}

fn accumulate(tasks: &[Task], progress: &mut TaskProgress) {
    for task in tasks {
        if !task.synthetic {
            progress.total += 1;
            if task.completed {
                progress.completed += 1;
            }
        }
        accumulate(&task.children, progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::parse_tasks;

    #[test]
    fn child_is_preferred_over_parent() {
        let tasks = parse_tasks("- [ ] 1. Parent\n- [x] 1.1 Done\n- [ ] 1.2 Open\n- [ ] 2. Next\n");
        let next = get_first_uncompleted_task(&tasks).expect("next");
        assert_eq!(next.id, "1.2");
    }

    #[test]
    fn childless_root_is_returned() {
        let tasks = parse_tasks("- [x] 1. Done\n- [ ] 2. Open\n");
        assert_eq!(get_first_uncompleted_task(&tasks).map(|t| t.id.as_str()), Some("2"));
    }

    #[test]
    fn complete_forest_has_no_next_task() {
        let tasks = parse_tasks("- [x] 1. Done\n- [ ] 2. Parent\n- [x] 2.1 Done\n");
        assert!(get_first_uncompleted_task(&tasks).is_none());
        assert!(get_first_uncompleted_task(&[]).is_none());
    }

    #[test]
    fn open_root_with_closed_children_is_returned() {
        let mut tasks = parse_tasks("- [ ] 3. Parent\n- [x] 3.1 Done\n");
        tasks[0].completed = false;
        assert_eq!(get_first_uncompleted_task(&tasks).map(|t| t.id.as_str()), Some("3"));
    }

    #[test]
    fn progress_skips_synthetic_roots() {
        let tasks = parse_tasks("- [x] 4.1 Done\n- [ ] 4.2 Open\n- [x] 5. Solo\n");
        let progress = task_progress(&tasks);
        assert_eq!(progress, TaskProgress { total: 3, completed: 2 });
        assert!(!progress.is_done());
    }
}
