//! Clone → append → commit → push workflow for whitelist files.
//!
//! Each call works in its own [`ScratchWorkspace`], so concurrent calls never
//! share a checkout.  Two calls that target the same branch are not
//! coordinated: the remote accepts the first push and rejects the second,
//! which surfaces as [`WhitelistError::Push`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use super::commands::{
    GitCommandError, git_add_all, git_clone_branch, git_commit, git_config_local, git_push,
};
use super::workspace::ScratchWorkspace;
use crate::config::GitConfig;
use crate::credentials::Credentials;
use crate::error::WhitelistError;
use crate::metrics::{GitOperation, MetricsRegistry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One entry to append, fully resolved by the caller.
#[derive(Debug, Clone)]
pub struct AppendJob {
    /// Clone URL, possibly with credentials embedded.
    pub repo_url: String,
    pub branch: String,
    /// Folder created (if missing) relative to the repository root.
    pub folder: String,
    /// File the entry is appended to, relative to the repository root.
    pub file_path: String,
    pub entry: String,
    pub tenant: String,
    pub environment: String,
    /// Credentials used to redact diagnostics; the username doubles as the
    /// commit author.
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub commit_message: String,
}

pub fn commit_message(tenant: &str, environment: &str, entry: &str) -> String {
    format!("Add {tenant} whitelist entry in {environment}: {entry}")
}

pub fn file_header(tenant: &str, environment: &str) -> String {
    format!("# Whitelist for {tenant} in {environment}\n# Format: IP,Description,Status\n")
}

// ---------------------------------------------------------------------------
// Mutator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GitMutator {
    clone_timeout: Duration,
    push_timeout: Duration,
    email_domain: String,
    workspace_root: Option<PathBuf>,
    permits: Arc<Semaphore>,
    metrics: MetricsRegistry,
}

impl GitMutator {
    pub fn new(config: &GitConfig, metrics: MetricsRegistry) -> Self {
        Self {
            clone_timeout: config.clone_timeout(),
            push_timeout: config.push_timeout(),
            email_domain: config.commit_email_domain.clone(),
            workspace_root: config.workspace_root.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_mutations)),
            metrics,
        }
    }

    /// Append `job.entry` to `job.file_path` on `job.branch` and push it.
    ///
    /// The remote is left unchanged unless every step succeeds.  The scratch
    /// workspace is removed before this returns, on every path.
    #[instrument(
        skip(self, job),
        fields(branch = %job.branch, tenant = %job.tenant, file = %job.file_path)
    )]
    pub async fn append_entry(&self, job: &AppendJob) -> Result<AppendReceipt, WhitelistError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("mutation semaphore closed")?;

        let workspace = ScratchWorkspace::create(self.workspace_root.as_deref()).await?;
        let result = self.run_in(&workspace, job).await;
        release(workspace, result).await
    }

    async fn run_in(
        &self,
        workspace: &ScratchWorkspace,
        job: &AppendJob,
    ) -> Result<AppendReceipt, WhitelistError> {
        let repo = workspace.path();
        let author = job.credentials.username.as_str();

        // 1. Shallow clone of the target branch.
        info!(branch = %job.branch, user = %author, "cloning branch");
        let started = Instant::now();
        let cloned = git_clone_branch(&job.repo_url, &job.branch, repo, self.clone_timeout).await;
        self.metrics.observe_git(GitOperation::Clone, started.elapsed());
        cloned.map_err(|e| WhitelistError::Clone {
            branch: job.branch.clone(),
            detail: redacted(&e, job),
        })?;

        // 2. Folder and file scaffold.
        let folder = repo.join(&job.folder);
        if !tokio::fs::try_exists(&folder).await.unwrap_or(false) {
            info!(folder = %job.folder, "creating folder");
            tokio::fs::create_dir_all(&folder)
                .await
                .with_context(|| format!("failed to create folder {}", job.folder))?;
        }

        let file = repo.join(&job.file_path);
        if !tokio::fs::try_exists(&file).await.unwrap_or(false) {
            tokio::fs::write(&file, file_header(&job.tenant, &job.environment))
                .await
                .with_context(|| format!("failed to create {}", job.file_path))?;
        }

        // 3. Append.
        info!(file = %job.file_path, tenant = %job.tenant, "appending entry");
        let mut handle = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&file)
            .await
            .with_context(|| format!("failed to open {} for append", job.file_path))?;
        handle
            .write_all(format!("{}\n", job.entry).as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", job.file_path))?;
        handle
            .flush()
            .await
            .with_context(|| format!("failed to flush {}", job.file_path))?;
        drop(handle);

        // 4. Workspace-local identity, stage and commit.
        let message = commit_message(&job.tenant, &job.environment, &job.entry);
        let started = Instant::now();
        let committed = async {
            git_config_local(repo, "user.name", author).await?;
            git_config_local(repo, "user.email", &format!("{author}@{}", self.email_domain))
                .await?;
            git_add_all(repo).await?;
            git_commit(repo, &message).await
        }
        .await;
        self.metrics.observe_git(GitOperation::Commit, started.elapsed());
        committed.map_err(|e| WhitelistError::Commit {
            detail: redacted(&e, job),
        })?;

        // 5. Push.
        let started = Instant::now();
        let pushed = git_push(repo, &job.branch, self.push_timeout).await;
        self.metrics.observe_git(GitOperation::Push, started.elapsed());
        pushed.map_err(|e| WhitelistError::Push {
            branch: job.branch.clone(),
            detail: redacted(&e, job),
        })?;

        info!(
            tenant = %job.tenant,
            environment = %job.environment,
            "entry added"
        );
        Ok(AppendReceipt {
            commit_message: message,
        })
    }
}

/// Remove `workspace` and hand back `result` untouched.  A failed removal is
/// only logged.
async fn release<T>(workspace: ScratchWorkspace, result: T) -> T {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.close().await {
        error!(workspace = %path.display(), error = %e, "failed to remove scratch workspace");
    }
    result
}

fn redacted(err: &GitCommandError, job: &AppendJob) -> String {
    let detail = job.credentials.redact(&err.diagnostic());
    warn!(error = %detail, "git step failed");
    detail
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::Command as StdCommand;

    use super::*;

    const BRANCH: &str = "jenkins-store-ort";

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=seed", "-c", "user.email=seed@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Bare remote with `BRANCH` holding a README.
    fn seeded_remote(root: &Path) -> PathBuf {
        let remote = root.join("remote.git");
        let seed = root.join("seed");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&seed).unwrap();
        git(&remote, &["init", "-q", "--bare"]);
        git(&seed, &["init", "-q"]);
        std::fs::write(seed.join("README.md"), "whitelists\n").unwrap();
        git(&seed, &["add", "."]);
        git(&seed, &["commit", "-q", "-m", "seed"]);
        git(
            &seed,
            &[
                "push",
                "-q",
                remote.to_str().unwrap(),
                &format!("HEAD:refs/heads/{BRANCH}"),
            ],
        );
        remote
    }

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    fn mutator(workspace_root: &Path) -> GitMutator {
        let config = GitConfig {
            workspace_root: Some(workspace_root.to_path_buf()),
            commit_email_domain: "corp.example".to_string(),
            ..GitConfig::default()
        };
        GitMutator::new(&config, MetricsRegistry::new())
    }

    fn job(repo_url: String, branch: &str, entry: &str) -> AppendJob {
        AppendJob {
            repo_url,
            branch: branch.to_string(),
            folder: "acme-corp".to_string(),
            file_path: "Whitelist.csv".to_string(),
            entry: entry.to_string(),
            tenant: "acme-corp".to_string(),
            environment: "ort".to_string(),
            credentials: Credentials::new("alice", "s3cret"),
        }
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn commit_message_format() {
        assert_eq!(
            commit_message("acme-corp", "ort", "1.2.3.4,office,active"),
            "Add acme-corp whitelist entry in ort: 1.2.3.4,office,active"
        );
    }

    #[tokio::test]
    async fn failed_cleanup_keeps_primary_result() {
        let root = tempfile::tempdir().unwrap();

        let workspace = ScratchWorkspace::create(Some(root.path())).await.unwrap();
        std::fs::remove_dir_all(workspace.path()).unwrap();
        let err = release(
            workspace,
            Err::<AppendReceipt, _>(WhitelistError::Push {
                branch: BRANCH.to_string(),
                detail: "rejected".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WhitelistError::Push { ref detail, .. } if detail == "rejected"));

        let workspace = ScratchWorkspace::create(Some(root.path())).await.unwrap();
        std::fs::remove_dir_all(workspace.path()).unwrap();
        let receipt = release(
            workspace,
            Ok::<_, WhitelistError>(AppendReceipt {
                commit_message: "Add acme-corp whitelist entry in ort: x".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(receipt.commit_message, "Add acme-corp whitelist entry in ort: x");
    }

    #[tokio::test]
    async fn appends_and_pushes_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = seeded_remote(tmp.path());
        let workspaces = tmp.path().join("workspaces");

        let receipt = mutator(&workspaces)
            .append_entry(&job(file_url(&remote), BRANCH, "1.2.3.4,office,active"))
            .await
            .unwrap();

        assert_eq!(
            receipt.commit_message,
            "Add acme-corp whitelist entry in ort: 1.2.3.4,office,active"
        );

        let content = git(&remote, &["show", &format!("{BRANCH}:Whitelist.csv")]);
        assert_eq!(
            content,
            "# Whitelist for acme-corp in ort\n# Format: IP,Description,Status\n1.2.3.4,office,active\n"
        );

        let log = git(&remote, &["log", "-1", "--format=%an <%ae>|%s", BRANCH]);
        assert_eq!(
            log.trim(),
            "alice <alice@corp.example>|Add acme-corp whitelist entry in ort: 1.2.3.4,office,active"
        );

        assert!(is_empty_dir(&workspaces));
    }

    #[tokio::test]
    async fn second_entry_is_last_line_and_header_not_repeated() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = seeded_remote(tmp.path());
        let workspaces = tmp.path().join("workspaces");
        let mutator = mutator(&workspaces);

        mutator
            .append_entry(&job(file_url(&remote), BRANCH, "10.0.0.1,vpn,active"))
            .await
            .unwrap();
        mutator
            .append_entry(&job(file_url(&remote), BRANCH, "10.0.0.2,lab,inactive"))
            .await
            .unwrap();

        let content = git(&remote, &["show", &format!("{BRANCH}:Whitelist.csv")]);
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines.last(), Some(&"10.0.0.2,lab,inactive"));
        assert_eq!(content.matches("# Whitelist for").count(), 1);
    }

    #[tokio::test]
    async fn missing_branch_is_clone_error_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = seeded_remote(tmp.path());
        let workspaces = tmp.path().join("workspaces");

        let err = mutator(&workspaces)
            .append_entry(&job(file_url(&remote), "jenkins-store-nope", "x"))
            .await
            .unwrap_err();

        match err {
            WhitelistError::Clone { branch, detail } => {
                assert_eq!(branch, "jenkins-store-nope");
                assert!(!detail.is_empty());
            }
            other => panic!("expected Clone error, got {other:?}"),
        }
        assert!(is_empty_dir(&workspaces));
    }

    #[tokio::test]
    async fn clone_diagnostics_are_redacted() {
        let tmp = tempfile::tempdir().unwrap();
        let workspaces = tmp.path().join("workspaces");
        let missing = tmp.path().join("s3cret-missing.git");

        let err = mutator(&workspaces)
            .append_entry(&job(file_url(&missing), BRANCH, "x"))
            .await
            .unwrap_err();

        let WhitelistError::Clone { detail, .. } = err else {
            panic!("expected Clone error");
        };
        assert!(!detail.contains("s3cret"), "{detail}");
        assert!(is_empty_dir(&workspaces));
    }

    #[tokio::test]
    async fn rejected_push_is_push_error() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = seeded_remote(tmp.path());
        let workspaces = tmp.path().join("workspaces");

        // Refuse every update to the branch.
        let hook = remote.join("hooks/pre-receive");
        std::fs::write(&hook, "#!/bin/sh\necho 'branch is locked' >&2\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let err = mutator(&workspaces)
            .append_entry(&job(file_url(&remote), BRANCH, "1.1.1.1,x,y"))
            .await
            .unwrap_err();

        match err {
            WhitelistError::Push { branch, detail } => {
                assert_eq!(branch, BRANCH);
                assert!(detail.contains("branch is locked"), "{detail}");
            }
            other => panic!("expected Push error, got {other:?}"),
        }

        // Remote branch untouched.
        let ls = git(&remote, &["ls-tree", "--name-only", BRANCH]);
        assert!(!ls.contains("Whitelist.csv"));
        assert!(is_empty_dir(&workspaces));
    }

    #[tokio::test]
    async fn file_in_tenant_folder_is_supported() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = seeded_remote(tmp.path());
        let workspaces = tmp.path().join("workspaces");

        let mut job = job(file_url(&remote), BRANCH, "8.8.8.8,dns,active");
        job.folder = "tenants/acme-corp".to_string();
        job.file_path = "tenants/acme-corp/Whitelist.csv".to_string();

        mutator(&workspaces).append_entry(&job).await.unwrap();

        let content = git(
            &remote,
            &["show", &format!("{BRANCH}:tenants/acme-corp/Whitelist.csv")],
        );
        assert!(content.ends_with("8.8.8.8,dns,active\n"));
    }
}
