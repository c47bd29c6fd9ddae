//! Local git operations and the task branch naming convention.

mod runner;

pub use runner::{GitRunner, TestSuite};

/// Branch name for a task: `task-<number>-<slug>`.
///
/// The name doubles as the reverse mapping from a merged pull request back
/// to its originating task during completion and recovery.
pub fn task_branch(number: u32, title: &str) -> String {
    format!("task-{}-{}", number, slugify(title))
}

/// Extract the task number from a `task-<number>-<slug>` branch name.
pub fn parse_task_branch(branch: &str) -> Option<u32> {
    let rest = branch.strip_prefix("task-")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    // Require the separator so "task-12x" does not parse as task 12.
    let after = &rest[digits.len()..];
    if !after.is_empty() && !after.starts_with('-') {
        return None;
    }
    digits.parse().ok()
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(40).collect()
}
