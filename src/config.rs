//! Service configuration.
//!
//! Values are resolved in three layers: built-in defaults, an optional YAML
//! file, then environment variable overrides.  The resulting [`Config`] is
//! validated once at startup and handed to every component explicitly.
//!
//! | Variable                        | Field                        |
//! |---------------------------------|------------------------------|
//! | `PORT`                          | port of `server.listen`      |
//! | `WHITELIST_LISTEN`              | `server.listen`              |
//! | `WHITELIST_UPSTREAM_HOST`       | `upstream.hostname`          |
//! | `WHITELIST_UPSTREAM_SCHEME`     | `upstream.scheme`            |
//! | `WHITELIST_PROJECT_KEY`         | `upstream.project_key`       |
//! | `WHITELIST_REPO_SLUG`           | `upstream.repo_slug`         |
//! | `WHITELIST_TLS_VERIFY`          | `upstream.tls_verify`        |
//! | `WHITELIST_COMMIT_EMAIL_DOMAIN` | `git.commit_email_domain`    |
//! | `WHITELIST_WORKSPACE_ROOT`      | `git.workspace_root`         |
//! | `APP_ENV`                       | `service.environment`        |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub git: GitConfig,
    pub service: ServiceConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:4900`).
    pub listen: String,
    /// Upper bound on accepted request bodies.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4900".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream (Bitbucket Server)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Host (and optional port) of the Bitbucket Server instance.
    pub hostname: String,
    /// `https` in production; `http` is accepted for local test doubles.
    pub scheme: String,
    /// Bitbucket project key, e.g. `SRE-PLATFORM`.
    pub project_key: String,
    /// Repository slug inside the project.
    pub repo_slug: String,
    /// Verify the upstream TLS certificate on REST reads.
    ///
    /// Turning this off accepts any certificate presented by the host.  It
    /// exists for hosts with private CAs that are not in the trust store.
    pub tls_verify: bool,
    /// Timeout (seconds) for raw-content reads.
    pub read_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            hostname: "bitbucket.example.com:8443".to_string(),
            scheme: "https".to_string(),
            project_key: "SRE-PLATFORM".to_string(),
            repo_slug: "tenant-whitelists".to_string(),
            tls_verify: true,
            read_timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    /// Clone URL with already percent-encoded userinfo embedded.
    ///
    /// Bitbucket Server serves git over `/scm/<project>/<repo>.git` with the
    /// project key in lower case.
    pub fn clone_url(&self, encoded_user: &str, encoded_password: &str) -> String {
        format!(
            "{}://{encoded_user}:{encoded_password}@{}/scm/{}/{}.git",
            self.scheme,
            self.hostname,
            self.project_key.to_lowercase(),
            self.repo_slug,
        )
    }

    /// REST endpoint returning the raw bytes of `file_path`.
    ///
    /// Each `/`-separated component of `file_path` becomes one encoded path
    /// segment, so `#`, `?` and `%` in a file name stay part of the path.
    pub fn raw_content_url(&self, file_path: &str) -> Result<reqwest::Url> {
        let base = format!("{}://{}/", self.scheme, self.hostname);
        let mut url = reqwest::Url::parse(&base)
            .with_context(|| format!("invalid upstream base URL: {base}"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("upstream URL cannot carry a path: {base}"))?
            .pop_if_empty()
            .extend([
                "rest",
                "api",
                "1.0",
                "projects",
                self.project_key.as_str(),
                "repos",
                self.repo_slug.as_str(),
                "raw",
            ])
            .extend(file_path.split('/'));
        Ok(url)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Git workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Timeout (seconds) for `git clone`.
    pub clone_timeout_secs: u64,
    /// Timeout (seconds) for `git push`.
    pub push_timeout_secs: u64,
    /// Domain used for the commit author email (`<user>@<domain>`).
    pub commit_email_domain: String,
    /// Parent directory for scratch workspaces.  Defaults to the system
    /// temp dir when unset.
    pub workspace_root: Option<PathBuf>,
    /// Maximum number of clone/commit/push workflows running at once.
    pub max_concurrent_mutations: usize,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_timeout_secs: 120,
            push_timeout_secs: 120,
            commit_email_domain: "example.com".to_string(),
            workspace_root: None,
            max_concurrent_mutations: 8,
        }
    }
}

impl GitConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Service metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deployment environment reported by `/health`.
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load, override and validate a [`Config`].
///
/// `path` is optional; without it the defaults plus environment overrides
/// are used.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let path = path.as_ref();
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };

    let env: HashMap<String, String> = std::env::vars().collect();
    apply_env_overrides(&mut config, &env)?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply environment overrides from `env` on top of `config`.
fn apply_env_overrides(config: &mut Config, env: &HashMap<String, String>) -> Result<()> {
    let get = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();

    if let Some(listen) = get("WHITELIST_LISTEN") {
        config.server.listen = listen;
    }
    if let Some(port) = get("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("PORT is not a valid port number: {port}"))?;
        let host = config
            .server
            .listen
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.listen = format!("{host}:{port}");
    }
    if let Some(host) = get("WHITELIST_UPSTREAM_HOST") {
        config.upstream.hostname = host;
    }
    if let Some(scheme) = get("WHITELIST_UPSTREAM_SCHEME") {
        config.upstream.scheme = scheme;
    }
    if let Some(key) = get("WHITELIST_PROJECT_KEY") {
        config.upstream.project_key = key;
    }
    if let Some(slug) = get("WHITELIST_REPO_SLUG") {
        config.upstream.repo_slug = slug;
    }
    if let Some(flag) = get("WHITELIST_TLS_VERIFY") {
        config.upstream.tls_verify = parse_bool(&flag)
            .with_context(|| format!("WHITELIST_TLS_VERIFY must be a boolean, got {flag}"))?;
    }
    if let Some(domain) = get("WHITELIST_COMMIT_EMAIL_DOMAIN") {
        config.git.commit_email_domain = domain;
    }
    if let Some(root) = get("WHITELIST_WORKSPACE_ROOT") {
        config.git.workspace_root = Some(PathBuf::from(root));
    }
    if let Some(environment) = get("APP_ENV") {
        config.service.environment = environment;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.upstream.hostname.trim().is_empty(),
        "upstream.hostname must not be empty"
    );
    anyhow::ensure!(
        matches!(config.upstream.scheme.as_str(), "http" | "https"),
        "upstream.scheme must be http or https"
    );
    anyhow::ensure!(
        !config.upstream.project_key.trim().is_empty(),
        "upstream.project_key must not be empty"
    );
    anyhow::ensure!(
        !config.upstream.repo_slug.trim().is_empty(),
        "upstream.repo_slug must not be empty"
    );
    anyhow::ensure!(
        !config.git.commit_email_domain.trim().is_empty(),
        "git.commit_email_domain must not be empty"
    );
    anyhow::ensure!(
        config.upstream.read_timeout_secs > 0
            && config.git.clone_timeout_secs > 0
            && config.git.push_timeout_secs > 0,
        "timeouts must be greater than zero"
    );
    anyhow::ensure!(
        config.git.max_concurrent_mutations > 0,
        "git.max_concurrent_mutations must be at least 1"
    );
    config
        .upstream
        .raw_content_url("Whitelist.csv")
        .context("upstream.hostname does not form a valid URL")?;
    config
        .server
        .listen
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid server.listen address: {}", config.server.listen))?;
    Ok(())
}
