use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{HiveError, Result};

pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HiveError::Git(stderr.trim().to_string()));
        }

        Ok(output)
    }

    /// Clone if the checkout does not exist yet, otherwise fetch and reset
    /// the default branch to the remote. Task branches always start from a
    /// fresh base.
    pub async fn ensure_checkout(&self, url: &str, remote: &str, base: &str) -> Result<()> {
        if !self.working_dir.join(".git").exists() {
            tokio::fs::create_dir_all(&self.working_dir).await?;
            self.run_checked(&["clone", url, "."]).await?;
            return Ok(());
        }
        self.run_checked(&["fetch", remote, "--prune"]).await?;
        self.run_checked(&["checkout", base]).await?;
        self.run_checked(&["reset", "--hard", &format!("{}/{}", remote, base)])
            .await?;
        Ok(())
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self.run_checked(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Create the task branch off a fresh base and switch to it.
    pub async fn checkout_task_branch(&self, branch: &str, remote: &str, base: &str) -> Result<()> {
        if self.branch_exists(branch).await? {
            // Stale local leftover from a previous attempt; rebuild from base.
            self.run_checked(&["checkout", base]).await?;
            self.run(&["branch", "-D", branch]).await?;
        }
        self.run_checked(&["checkout", "-b", branch, &format!("{}/{}", remote, base)])
            .await?;
        Ok(())
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self
            .run(&["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
            .await?;
        Ok(output.status.success())
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<bool> {
        let output = self.run(&["branch", "-D", branch]).await?;
        Ok(output.status.success())
    }

    /// Number of commits on `branch` that are not on `base`.
    pub async fn commit_count(&self, base: &str, branch: &str) -> Result<u32> {
        let range = format!("{}..{}", base, branch);
        let output = self.run_checked(&["rev-list", "--count", &range]).await?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse()
            .map_err(|_| HiveError::Git(format!("unparsable rev-list count: {}", text.trim())))
    }

    /// Files changed between `base` and `branch`.
    pub async fn changed_files(&self, base: &str, branch: &str) -> Result<Vec<String>> {
        let range = format!("{}...{}", base, branch);
        let output = self
            .run_checked(&["diff", "--name-only", &range])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// True when `ancestor` is already contained in `descendant`.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self
            .run(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        Ok(output.status.success())
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", "-u", remote, branch]).await?;
        Ok(())
    }

    /// Independently confirm the branch is present on the remote. A push
    /// acknowledgment alone is not trusted.
    pub async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let output = self
            .run_checked(&["ls-remote", "--heads", remote, branch])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .any(|l| l.ends_with(&format!("refs/heads/{}", branch))))
    }

    /// Whether the checkout carries a test suite this engine recognizes.
    pub fn detect_test_suite(&self) -> Option<TestSuite> {
        let dir = &self.working_dir;
        if dir.join("Cargo.toml").exists() {
            return Some(TestSuite::Cargo);
        }
        if dir.join("package.json").exists() {
            return Some(TestSuite::Npm);
        }
        if dir.join("pytest.ini").exists()
            || dir.join("pyproject.toml").exists()
            || dir.join("setup.py").exists()
        {
            return Some(TestSuite::Pytest);
        }
        if dir.join("go.mod").exists() {
            return Some(TestSuite::GoTest);
        }
        None
    }

    /// Run the detected suite; returns (passed, trailing output).
    pub async fn run_test_suite(&self, suite: TestSuite) -> Result<(bool, String)> {
        let (program, args): (&str, &[&str]) = match suite {
            TestSuite::Cargo => ("cargo", &["test", "--quiet"]),
            TestSuite::Npm => ("npm", &["test", "--silent"]),
            TestSuite::Pytest => ("python", &["-m", "pytest", "-q"]),
            TestSuite::GoTest => ("go", &["test", "./..."]),
        };

        debug!(program, ?args, "Running test suite");
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let tail: String = combined
            .lines()
            .rev()
            .take(40)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");

        Ok((output.status.success(), tail))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSuite {
    Cargo,
    Npm,
    Pytest,
    GoTest,
}

impl std::fmt::Display for TestSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cargo => write!(f, "cargo test"),
            Self::Npm => write!(f, "npm test"),
            Self::Pytest => write!(f, "pytest"),
            Self::GoTest => write!(f, "go test"),
        }
    }
}
