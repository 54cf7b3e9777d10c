//! Active-path selection through a delegation tree.

use crate::task::Task;

/// Follow the delegation chain from `root` to the task that receives control.
pub fn active_leaf(root: &dyn Task) -> &dyn Task {
    let mut current = root;
    while let Some(child) = current.core().child() {
        current = child;
    }
    current
}

/// One label per task from `root` down to the active leaf, formatted as
/// `"<id> <description> [<phase>]"`.
pub fn active_path(root: &dyn Task) -> Vec<String> {
    let mut path = Vec::new();
    let mut current = Some(root);
    while let Some(task) = current {
        path.push(format!(
            "{} {} [{}]",
            task.id(),
            task.description(),
            task.phase_name()
        ));
        current = task.core().child();
    }
    path
}
