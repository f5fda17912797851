//! Git command wrappers using [`tokio::process::Command`].
//!
//! Every function shells out to the system `git` binary.  Commands that act
//! on a checkout receive its path explicitly (`git -C <dir>`); the process
//! working directory is never touched.  Remote URLs may carry credentials, so
//! they are never recorded in spans or logs.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Why a git invocation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum GitCommandError {
    #[error("failed to spawn git {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("git {op} timed out after {}s", .timeout.as_secs())]
    TimedOut { op: &'static str, timeout: Duration },
    #[error("git {op} failed ({status}): {stderr}")]
    Failed {
        op: &'static str,
        status: String,
        stderr: String,
    },
}

impl GitCommandError {
    /// Diagnostic text suitable for surfacing to an operator: git's own
    /// stderr when it ran, otherwise the error message.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Failed { stderr, .. } if !stderr.is_empty() => stderr.clone(),
            other => other.to_string(),
        }
    }
}

pub type GitResult<T> = Result<T, GitCommandError>;

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run `git <args>` with prompts disabled, optionally bounded by `timeout`.
///
/// Returns captured stdout on success.
async fn run_git<I, S>(op: &'static str, args: I, timeout: Option<Duration>) -> GitResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new("git");
    cmd.args(args);

    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    debug!(op, "spawning git");

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| GitCommandError::TimedOut { op, timeout: limit })?,
        None => cmd.output().await,
    }
    .map_err(|source| GitCommandError::Spawn { op, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // `git commit` reports "nothing to commit" on stdout.
        let text = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(GitCommandError::Failed {
            op,
            status: output.status.to_string(),
            stderr: text,
        });
    }

    debug!(op, "git succeeded");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

/// Run `git clone -b <branch> --depth 1 <url> <dest>`.
#[instrument(skip(url), fields(%branch, dest = %dest.display()))]
pub async fn git_clone_branch(
    url: &str,
    branch: &str,
    dest: &Path,
    timeout: Duration,
) -> GitResult<()> {
    run_git(
        "clone",
        [
            OsStr::new("clone"),
            OsStr::new("-b"),
            OsStr::new(branch),
            OsStr::new("--depth"),
            OsStr::new("1"),
            OsStr::new(url),
            dest.as_os_str(),
        ],
        Some(timeout),
    )
    .await
    .map(drop)
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Run `git -C <repo> config <key> <value>`, which writes the repository's
/// own `.git/config` and leaves global configuration untouched.
#[instrument(fields(repo = %repo.display()))]
pub async fn git_config_local(repo: &Path, key: &str, value: &str) -> GitResult<()> {
    run_git(
        "config",
        [
            OsStr::new("-C"),
            repo.as_os_str(),
            OsStr::new("config"),
            OsStr::new(key),
            OsStr::new(value),
        ],
        None,
    )
    .await
    .map(drop)
}

// ---------------------------------------------------------------------------
// Stage / commit
// ---------------------------------------------------------------------------

/// Run `git -C <repo> add .`.
#[instrument(fields(repo = %repo.display()))]
pub async fn git_add_all(repo: &Path) -> GitResult<()> {
    run_git(
        "add",
        [OsStr::new("-C"), repo.as_os_str(), OsStr::new("add"), OsStr::new(".")],
        None,
    )
    .await
    .map(drop)
}

/// Run `git -C <repo> commit -m <message>`.
///
/// Signing is disabled for this invocation so a host-level
/// `commit.gpgsign` cannot block a non-interactive commit.
#[instrument(skip(message), fields(repo = %repo.display()))]
pub async fn git_commit(repo: &Path, message: &str) -> GitResult<()> {
    run_git(
        "commit",
        [
            OsStr::new("-C"),
            repo.as_os_str(),
            OsStr::new("-c"),
            OsStr::new("commit.gpgsign=false"),
            OsStr::new("commit"),
            OsStr::new("-m"),
            OsStr::new(message),
        ],
        None,
    )
    .await
    .map(drop)
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Run `git -C <repo> push origin <branch>`.
#[instrument(fields(repo = %repo.display(), %branch))]
pub async fn git_push(repo: &Path, branch: &str, timeout: Duration) -> GitResult<()> {
    run_git(
        "push",
        [
            OsStr::new("-C"),
            repo.as_os_str(),
            OsStr::new("push"),
            OsStr::new("origin"),
            OsStr::new(branch),
        ],
        Some(timeout),
    )
    .await
    .map(drop)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
