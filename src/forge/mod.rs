//! Version-control host abstraction.
//!
//! The HTTP handlers only ever talk to a [`ForgeBackend`].  The production
//! implementation targets Bitbucket Server; tests substitute an in-memory
//! double so handler behaviour can be checked without git or a network.

pub mod bitbucket;

use async_trait::async_trait;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::WhitelistError;
use crate::metrics::MetricsRegistry;
use crate::naming::WhitelistTarget;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A validated request to append one entry to a whitelist file.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub credentials: Credentials,
    pub branch: String,
    pub target: WhitelistTarget,
    pub entry: String,
    pub tenant: String,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub commit_message: String,
}

/// A validated request to read one whitelist file.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub credentials: Credentials,
    pub branch: String,
    pub file_path: String,
}

/// File content as returned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub content: String,
    /// Non-empty lines with trailing `\r` removed.
    pub lines: Vec<String>,
}

impl RawFile {
    pub fn from_content(content: String) -> Self {
        let lines = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { content, lines }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ForgeBackend: Send + Sync {
    /// Clone the branch, append the entry, commit and push.
    async fn append_entry(&self, request: &AppendRequest) -> Result<AppendOutcome, WhitelistError>;

    /// Read a file at the tip of a branch.
    async fn fetch_raw(&self, request: &FetchRequest) -> Result<RawFile, WhitelistError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured [`ForgeBackend`].
pub fn build_backend(
    config: &Config,
    metrics: MetricsRegistry,
) -> anyhow::Result<Box<dyn ForgeBackend>> {
    Ok(Box::new(bitbucket::BitbucketBackend::new(config, metrics)?))
}
