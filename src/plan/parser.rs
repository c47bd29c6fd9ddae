use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::task::{Task, TaskStatus};
use super::Plan;

static TASK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- \[(.)\] (\d+)\. (.*)$").expect("static regex"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((assignee|claimed-at|deps|files|est):\s*([^)]*)\)").expect("static regex")
});

/// Parse an issue into a plan.
///
/// Returns `None` when the body does not match the plan structure: a
/// `## Tasks` section with at least one well-formed task line, unique task
/// numbers, parsable markers and dependency lists. Callers treat `None` as
/// "not a plan", never as an error; a malformed body must not yield a
/// partial plan.
pub fn parse(title: &str, body: &str) -> Option<Plan> {
    let mut goal = Vec::new();
    let mut context = Vec::new();
    let mut verification_steps = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut saw_tasks_section = false;

    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Goal,
        Context,
        Tasks,
        Verification,
        Other,
    }

    let mut section = Section::Preamble;

    for raw_line in body.lines() {
        let line = raw_line.trim_end();

        if let Some(heading) = line.strip_prefix("## ") {
            section = match heading.trim().to_ascii_lowercase().as_str() {
                "goal" => Section::Goal,
                "context" => Section::Context,
                "tasks" => {
                    saw_tasks_section = true;
                    Section::Tasks
                }
                "verification" => Section::Verification,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Goal => goal.push(line),
            Section::Context => context.push(line),
            Section::Verification => {
                if let Some(step) = line.strip_prefix("- ") {
                    let step = step.trim();
                    if !step.is_empty() {
                        verification_steps.push(step.to_string());
                    }
                }
            }
            Section::Tasks => {
                if let Some(caps) = TASK_LINE.captures(line) {
                    let marker = caps[1].chars().next()?;
                    let status = TaskStatus::from_marker(marker)?;
                    let number: u32 = caps[2].parse().ok()?;
                    if !seen.insert(number) {
                        // Duplicate ordinal: the plan is not trustworthy.
                        return None;
                    }
                    tasks.push(parse_task_line(number, status, &caps[3])?);
                } else if line.starts_with("- ") {
                    // A list item that is not a task line means the section
                    // does not follow the expected structure.
                    return None;
                } else if let Some(cont) = line.strip_prefix("  ") {
                    if let Some(task) = tasks.last_mut() {
                        if !task.description.is_empty() {
                            task.description.push('\n');
                        }
                        task.description.push_str(cont.trim_end());
                    }
                }
            }
            Section::Preamble | Section::Other => {}
        }
    }

    if !saw_tasks_section || tasks.is_empty() {
        return None;
    }

    Some(Plan {
        title: title.to_string(),
        goal: join_trimmed(&goal),
        context: join_trimmed(&context),
        tasks,
        verification_steps,
        raw_body: body.to_string(),
    })
}

fn parse_task_line(number: u32, status: TaskStatus, rest: &str) -> Option<Task> {
    let mut task = Task::new(number, "");
    task.status = status;

    for caps in TAG.captures_iter(rest) {
        let value = caps[2].trim();
        match &caps[1] {
            "assignee" => task.assignee = Some(value.trim_start_matches('@').to_string()),
            "claimed-at" => {
                // An unreadable timestamp degrades to "no proof of
                // freshness", which the staleness sweep treats as stale.
                task.claimed_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            "deps" => {
                for part in value.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    task.dependencies.push(part.parse().ok()?);
                }
            }
            "files" => {
                task.files = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "est" => {
                if !value.is_empty() {
                    task.estimate = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let title = TAG.replace_all(rest, "").trim().to_string();
    if title.is_empty() {
        return None;
    }
    task.title = title;
    Some(task)
}

fn join_trimmed(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}

/// Render a plan body in canonical form. Used when the engine authors a new
/// plan issue; existing bodies are only ever patched, never re-rendered.
pub fn render(plan: &Plan) -> String {
    let mut out = String::new();

    if !plan.goal.is_empty() {
        out.push_str("## Goal\n\n");
        out.push_str(&plan.goal);
        out.push_str("\n\n");
    }
    if !plan.context.is_empty() {
        out.push_str("## Context\n\n");
        out.push_str(&plan.context);
        out.push_str("\n\n");
    }

    out.push_str("## Tasks\n\n");
    for task in &plan.tasks {
        out.push_str(&render_task_line(task));
        out.push('\n');
        for line in task.description.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }

    if !plan.verification_steps.is_empty() {
        out.push_str("\n## Verification\n\n");
        for step in &plan.verification_steps {
            out.push_str("- ");
            out.push_str(step);
            out.push('\n');
        }
    }

    out
}

/// Canonical single-line form of a task.
pub fn render_task_line(task: &Task) -> String {
    let mut line = format!("- [{}] {}. {}", task.status.marker(), task.number, task.title);

    if let Some(assignee) = &task.assignee {
        line.push_str(&format!(" (assignee: @{})", assignee));
    }
    if let Some(at) = task.claimed_at {
        line.push_str(&format!(
            " (claimed-at: {})",
            at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ));
    }
    if !task.dependencies.is_empty() {
        let deps: Vec<String> = task.dependencies.iter().map(u32::to_string).collect();
        line.push_str(&format!(" (deps: {})", deps.join(", ")));
    }
    if !task.files.is_empty() {
        line.push_str(&format!(" (files: {})", task.files.join(", ")));
    }
    if let Some(est) = &task.estimate {
        line.push_str(&format!(" (est: {})", est));
    }

    line
}

/// Rewrite exactly one task's status line inside a raw plan body.
///
/// Every other byte of the body is preserved, including human edits outside
/// the structured fields. Returns `None` when the task line is absent or
/// ambiguous, or the line no longer parses.
pub fn patch_task_status(
    raw: &str,
    number: u32,
    status: TaskStatus,
    assignee: Option<&str>,
    claimed_at: Option<DateTime<Utc>>,
) -> Option<String> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let mut target: Option<usize> = None;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = TASK_LINE.captures(line.trim_end()) {
            if caps[2].parse::<u32>().ok() == Some(number) {
                if target.is_some() {
                    return None;
                }
                target = Some(idx);
            }
        }
    }

    let idx = target?;
    let trimmed = lines[idx].trim_end();
    let caps = TASK_LINE.captures(trimmed)?;
    let old_status = TaskStatus::from_marker(caps[1].chars().next()?)?;
    let mut task = parse_task_line(number, old_status, &caps[3])?;

    task.status = status;
    task.assignee = assignee.map(str::to_string);
    task.claimed_at = claimed_at;

    let mut patched: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    patched[idx] = render_task_line(&task);
    Some(patched.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "\
Intro prose the parser must ignore.

## Goal

Ship the widget pipeline.

## Context

Inherited from the Q3 roadmap.

## Tasks

- [ ] 1. Build the parser (files: src/parser.rs) (est: 2h)
  Line-oriented, no look-ahead.
- [ ] 2. Wire the coordinator (deps: 1)
- [x] 3. Set up CI

## Verification

- cargo test passes
- demo script runs
";

    #[test]
    fn parses_full_plan() {
        let plan = parse("Widget plan", BODY).unwrap();
        assert_eq!(plan.title, "Widget plan");
        assert_eq!(plan.goal, "Ship the widget pipeline.");
        assert_eq!(plan.context, "Inherited from the Q3 roadmap.");
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.verification_steps.len(), 2);

        let t1 = plan.find_task(1).unwrap();
        assert_eq!(t1.title, "Build the parser");
        assert_eq!(t1.description, "Line-oriented, no look-ahead.");
        assert_eq!(t1.files, vec!["src/parser.rs"]);
        assert_eq!(t1.estimate.as_deref(), Some("2h"));

        let t2 = plan.find_task(2).unwrap();
        assert_eq!(t2.dependencies, vec![1]);

        assert_eq!(plan.find_task(3).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn non_plan_bodies_yield_none() {
        assert!(parse("t", "Just a bug report, no structure.").is_none());
        assert!(parse("t", "## Tasks\n\nno list items here\n").is_none());
        // A tasks section with an unparsable list item is malformed, not
        // partially parsable.
        assert!(parse("t", "## Tasks\n\n- [ ] not numbered\n").is_none());
        assert!(parse("t", "## Tasks\n\n- [?] 1. bad marker\n").is_none());
    }

    #[test]
    fn duplicate_numbers_are_malformed() {
        let body = "## Tasks\n\n- [ ] 1. a\n- [ ] 1. b\n";
        assert!(parse("t", body).is_none());
    }

    #[test]
    fn bad_dependency_is_malformed() {
        let body = "## Tasks\n\n- [ ] 1. a (deps: one)\n";
        assert!(parse("t", body).is_none());
    }

    #[test]
    fn assignee_and_claim_tags_parse() {
        let body =
            "## Tasks\n\n- [c] 1. held (assignee: @worker-1) (claimed-at: 2026-08-06T10:00:00Z)\n";
        let plan = parse("t", body).unwrap();
        let t = plan.find_task(1).unwrap();
        assert_eq!(t.status, TaskStatus::Claimed);
        assert_eq!(t.assignee.as_deref(), Some("worker-1"));
        assert!(t.claimed_at.is_some());
    }

    #[test]
    fn render_parse_round_trip() {
        let plan = parse("Widget plan", BODY).unwrap();
        let rendered = render(&plan);
        let reparsed = parse("Widget plan", &rendered).unwrap();

        assert_eq!(reparsed.tasks.len(), plan.tasks.len());
        for (a, b) in plan.tasks.iter().zip(reparsed.tasks.iter()) {
            assert_eq!(a.number, b.number);
            assert_eq!(a.status, b.status);
            assert_eq!(a.dependencies, b.dependencies);
            assert_eq!(a.title, b.title);
            assert_eq!(a.description, b.description);
        }
        assert_eq!(reparsed.verification_steps, plan.verification_steps);
    }

    #[test]
    fn patch_touches_exactly_one_line() {
        let patched = patch_task_status(
            BODY,
            2,
            TaskStatus::Claimed,
            Some("worker-1"),
            Some("2026-08-06T10:00:00Z".parse().unwrap()),
        )
        .unwrap();

        let before: Vec<&str> = BODY.split('\n').collect();
        let after: Vec<&str> = patched.split('\n').collect();
        assert_eq!(before.len(), after.len());

        let diffs: Vec<usize> = before
            .iter()
            .zip(after.iter())
            .enumerate()
            .filter(|(_, (b, a))| b != a)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(diffs.len(), 1);
        assert!(after[diffs[0]].contains("- [c] 2. Wire the coordinator"));
        assert!(after[diffs[0]].contains("(assignee: @worker-1)"));
        assert!(after[diffs[0]].contains("(deps: 1)"), "other tags survive");
    }

    #[test]
    fn patch_reset_clears_claim_tags() {
        let claimed = patch_task_status(
            BODY,
            1,
            TaskStatus::InProgress,
            Some("worker-1"),
            Some(Utc::now()),
        )
        .unwrap();
        let reset = patch_task_status(&claimed, 1, TaskStatus::Pending, None, None).unwrap();
        let plan = parse("t", &reset).unwrap();
        let t = plan.find_task(1).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.assignee.is_none());
        assert!(t.claimed_at.is_none());
        // Untouched structured fields survive both rewrites.
        assert_eq!(t.files, vec!["src/parser.rs"]);
    }

    #[test]
    fn patch_missing_task_returns_none() {
        assert!(patch_task_status(BODY, 9, TaskStatus::Pending, None, None).is_none());
    }

    #[test]
    fn human_prose_survives_patching() {
        let patched =
            patch_task_status(BODY, 3, TaskStatus::Completed, None, None).unwrap();
        assert!(patched.contains("Intro prose the parser must ignore."));
        assert!(patched.contains("Inherited from the Q3 roadmap."));
    }
}
