//! Local git operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::process::{CommandError, CommandRunner, CommandSpec};

/// Field and record separators of the `git log` format below.
const FIELD_SEPARATOR: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%at%x1f%B";

/// One commit from `git log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitCommit {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// The `Change-Id:` trailer, if the commit has one.
    pub change_id: Option<String>,
}

impl GitCommit {
    #[must_use]
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// The last `Change-Id: I<40 hex>` trailer of a commit message.
#[must_use]
pub fn change_id_trailer(message: &str) -> Option<&str> {
    message.lines().rev().find_map(|line| {
        let value = line.trim().strip_prefix("Change-Id:")?.trim();
        let hex = value.strip_prefix('I')?;
        (hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(value)
    })
}

/// Parse `git log -z` output in [`LOG_FORMAT`]. Malformed records are skipped.
#[must_use]
pub fn parse_log(output: &str) -> Vec<GitCommit> {
    output
        .split('\0')
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let mut fields = record.trim_start_matches('\n').splitn(5, FIELD_SEPARATOR);
            let sha = fields.next()?.trim().to_string();
            let author_name = fields.next()?.to_string();
            let author_email = fields.next()?.to_string();
            let seconds: i64 = fields.next()?.trim().parse().ok()?;
            let message = fields.next()?.trim_end().to_string();
            Some(GitCommit {
                change_id: change_id_trailer(&message).map(str::to_string),
                sha,
                author_name,
                author_email,
                timestamp: DateTime::from_timestamp(seconds, 0)?,
                message,
            })
        })
        .collect()
}

/// A git working tree driven through a [`CommandRunner`].
#[derive(Clone)]
pub struct GitRepo {
    runner: Arc<dyn CommandRunner>,
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo").field("root", &self.root).finish()
    }
}

impl GitRepo {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git<I, S>(&self, args: I) -> Result<String, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("git", args).cwd(&self.root);
        self.runner.run(&spec).await?.into_stdout(&spec)
    }

    /// The last `count` commits reachable from HEAD.
    pub async fn log(&self, count: u32) -> Result<Vec<GitCommit>, CommandError> {
        let count = count.to_string();
        let output = self.git(["log", LOG_FORMAT, "-z", "-n", count.as_str()]).await?;
        Ok(parse_log(&output))
    }

    /// `Change-Id` of the HEAD commit.
    pub async fn head_change_id(&self) -> Result<Option<String>, CommandError> {
        Ok(self
            .log(1)
            .await?
            .into_iter()
            .next()
            .and_then(|commit| commit.change_id))
    }

    /// Current branch name, or `None` on a detached HEAD.
    pub async fn current_branch(&self) -> Result<Option<String>, CommandError> {
        let name = self.git(["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let name = name.trim();
        Ok((name != "HEAD" && !name.is_empty()).then(|| name.to_string()))
    }

    pub async fn head_sha(&self) -> Result<String, CommandError> {
        Ok(self.git(["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    /// Whether tracked or untracked files have local modifications.
    pub async fn is_dirty(&self) -> Result<bool, CommandError> {
        Ok(!self.git(["status", "--porcelain"]).await?.trim().is_empty())
    }

    /// Stash local changes, untracked files included.
    pub async fn stash_push(&self, message: &str) -> Result<(), CommandError> {
        self.git(["stash", "push", "--include-untracked", "-m", message])
            .await
            .map(|_| ())
    }

    /// Stash references (`stash@{n}`) whose message contains `message`.
    pub async fn find_stash(&self, message: &str) -> Result<Option<String>, CommandError> {
        let list = self.git(["stash", "list", "--format=%gd%x1f%gs"]).await?;
        Ok(list.lines().find_map(|line| {
            let (reference, subject) = line.split_once(FIELD_SEPARATOR)?;
            subject.contains(message).then(|| reference.to_string())
        }))
    }

    pub async fn stash_pop(&self, reference: &str) -> Result<(), CommandError> {
        self.git(["stash", "pop", reference]).await.map(|_| ())
    }

    pub async fn stash_drop(&self, reference: &str) -> Result<(), CommandError> {
        self.git(["stash", "drop", reference]).await.map(|_| ())
    }

    pub async fn fetch(&self, remote: &str, git_ref: &str) -> Result<(), CommandError> {
        self.git(["fetch", remote, git_ref]).await.map(|_| ())
    }

    pub async fn checkout(&self, target: &str) -> Result<(), CommandError> {
        self.git(["checkout", target]).await.map(|_| ())
    }

    pub async fn rebase(&self, onto: &str) -> Result<(), CommandError> {
        self.git(["rebase", onto]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, ExitKind, ScriptedRunner};

    const CHANGE_ID: &str = "I0123456789abcdef0123456789abcdef01234567";

    fn record(sha: &str, at: i64, message: &str) -> String {
        format!("{sha}\u{1f}Jane Doe\u{1f}jane@example.com\u{1f}{at}\u{1f}{message}\n")
    }

    #[test]
    fn test_change_id_trailer_takes_last_valid_trailer() {
        let message = format!(
            "Subject\n\nChange-Id: Ibad\n\nSigned-off-by: Jane\nChange-Id: {CHANGE_ID}\n"
        );
        assert_eq!(change_id_trailer(&message), Some(CHANGE_ID));
        assert_eq!(change_id_trailer("Subject only"), None);
    }

    #[test]
    fn test_parse_log_splits_nul_separated_records() {
        let output = format!(
            "{}\0{}\0",
            record("aaa", 1_700_000_000, &format!("First\n\nBody\n\nChange-Id: {CHANGE_ID}")),
            record("bbb", 1_700_000_100, "Second")
        );
        let commits = parse_log(&output);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].sha, "aaa");
        assert_eq!(commits[0].subject(), "First");
        assert_eq!(commits[0].change_id.as_deref(), Some(CHANGE_ID));
        assert_eq!(commits[1].change_id, None);
        assert_eq!(commits[1].timestamp.timestamp(), 1_700_000_100);
    }

    #[test]
    fn test_parse_log_skips_malformed_records() {
        assert!(parse_log("garbage\0").is_empty());
        assert!(parse_log("").is_empty());
    }

    #[tokio::test]
    async fn test_head_change_id_and_detached_head() {
        let runner = ScriptedRunner::new();
        runner.push(
            &format!("git log {LOG_FORMAT} -z -n 1"),
            CommandOutput::success(record("aaa", 1, &format!("Msg\n\nChange-Id: {CHANGE_ID}"))),
        );
        runner.push("git rev-parse --abbrev-ref HEAD", CommandOutput::success("HEAD\n"));
        let repo = GitRepo::new(Arc::new(runner), "/tmp/repo");

        assert_eq!(
            repo.head_change_id().await.expect("log").as_deref(),
            Some(CHANGE_ID)
        );
        assert_eq!(repo.current_branch().await.expect("branch"), None);
    }

    #[tokio::test]
    async fn test_failed_rebase_reports_stderr() {
        let runner = ScriptedRunner::new();
        runner.push(
            "git rebase origin/main",
            CommandOutput {
                stdout: String::new(),
                stderr: "CONFLICT (content)\n".to_string(),
                exit: ExitKind::Code(1),
            },
        );
        let repo = GitRepo::new(Arc::new(runner), "/tmp/repo");
        let err = repo.rebase("origin/main").await.expect_err("conflict");
        assert!(err.to_string().contains("CONFLICT"));
    }

    #[tokio::test]
    async fn test_find_stash_matches_message() {
        let runner = ScriptedRunner::new();
        runner.push(
            "git stash list --format=%gd%x1f%gs",
            CommandOutput::success(
                "stash@{0}\u{1f}On main: other\nstash@{1}\u{1f}On main: gerrit-lens change 42\n",
            ),
        );
        let repo = GitRepo::new(Arc::new(runner), "/tmp/repo");
        assert_eq!(
            repo.find_stash("gerrit-lens change 42").await.expect("list").as_deref(),
            Some("stash@{1}")
        );
    }
}
