//! Bitbucket Server backend.
//!
//! Writes go through git over HTTPS (`/scm/<project>/<repo>.git`) with the
//! caller's credentials embedded in the clone URL.  Reads use the REST raw
//! content endpoint with the same credentials as Basic auth.

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, UpstreamConfig};
use crate::error::WhitelistError;
use crate::git::{AppendJob, GitMutator};
use crate::metrics::MetricsRegistry;

use super::{AppendOutcome, AppendRequest, FetchRequest, ForgeBackend, RawFile};

// ---------------------------------------------------------------------------
// Backend struct
// ---------------------------------------------------------------------------

pub struct BitbucketBackend {
    upstream: UpstreamConfig,
    http_client: reqwest::Client,
    mutator: GitMutator,
    metrics: MetricsRegistry,
}

impl BitbucketBackend {
    pub fn new(config: &Config, metrics: MetricsRegistry) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream.read_timeout())
            .danger_accept_invalid_certs(!config.upstream.tls_verify)
            .user_agent(concat!("whitelist-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            upstream: config.upstream.clone(),
            http_client,
            mutator: GitMutator::new(&config.git, metrics.clone()),
            metrics,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> WhitelistError {
        let timed_out = err.is_timeout();
        self.metrics
            .record_upstream_read(if timed_out { "timeout" } else { "error" });
        // reqwest errors carry the URL, which has no userinfo on this path.
        warn!(error = %err, timed_out, "upstream read failed");
        WhitelistError::Upstream {
            detail: err.to_string(),
            timed_out,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl ForgeBackend for BitbucketBackend {
    async fn append_entry(&self, request: &AppendRequest) -> Result<AppendOutcome, WhitelistError> {
        let (user, password) = request.credentials.url_encoded();
        let job = AppendJob {
            repo_url: self.upstream.clone_url(&user, &password),
            branch: request.branch.clone(),
            folder: request.target.folder.clone(),
            file_path: request.target.file_path.clone(),
            entry: request.entry.clone(),
            tenant: request.tenant.clone(),
            environment: request.environment.clone(),
            credentials: request.credentials.clone(),
        };

        let receipt = self.mutator.append_entry(&job).await?;
        Ok(AppendOutcome {
            commit_message: receipt.commit_message,
        })
    }

    #[instrument(
        skip(self, request),
        fields(branch = %request.branch, file = %request.file_path)
    )]
    async fn fetch_raw(&self, request: &FetchRequest) -> Result<RawFile, WhitelistError> {
        let url = self.upstream.raw_content_url(&request.file_path)?;
        debug!(%url, "fetching raw content");

        let response = self
            .http_client
            .get(url)
            .query(&[("at", request.branch.as_str())])
            .basic_auth(
                &request.credentials.username,
                Some(&request.credentials.password),
            )
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        self.metrics.record_upstream_read(status.as_str());

        if status != reqwest::StatusCode::OK {
            warn!(%status, "upstream refused raw content read");
            return Err(WhitelistError::NotFoundOrDenied {
                status: status.as_u16(),
                file_path: request.file_path.clone(),
                branch: request.branch.clone(),
            });
        }

        let content = response.text().await.map_err(|e| self.transport_error(e))?;
        let raw = RawFile::from_content(content);
        info!(lines = raw.line_count(), "raw content fetched");
        Ok(raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;

    use super::*;
    use crate::credentials::Credentials;
    use crate::naming::WhitelistTarget;

    const RAW_ROUTE: &str = "/rest/api/1.0/projects/{project}/repos/{repo}/raw/{*path}";
    // "alice:s3cret"
    const ALICE_AUTH: &str = "Basic YWxpY2U6czNjcmV0";

    async fn fake_raw(
        Path((project, repo, path)): Path<(String, String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> (StatusCode, String) {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == ALICE_AUTH);
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "unauthorized".into());
        }
        if project != "OPS" || repo != "lists" {
            return (StatusCode::NOT_FOUND, "no such repo".into());
        }
        match (query.get("at").map(String::as_str), path.as_str()) {
            (Some("jenkins-store-ort"), "tenants/acme-corp/Whitelist.csv") => (
                StatusCode::OK,
                "# Whitelist for acme-corp in ort\r\n1.2.3.4,office,active\r\n\r\n".into(),
            ),
            (Some("jenkins-store-ort"), "tenants/acme-corp/rules#1.csv") => {
                (StatusCode::OK, "rules-hash\n".into())
            }
            (Some("jenkins-store-ort"), "tenants/acme-corp/a?b.csv") => {
                (StatusCode::OK, "question-mark\n".into())
            }
            (Some("jenkins-store-ort"), "tenants/slow/Whitelist.csv") => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                (StatusCode::OK, String::new())
            }
            _ => (StatusCode::NOT_FOUND, "not found".into()),
        }
    }

    async fn spawn_fake_upstream() -> SocketAddr {
        let app = Router::new().route(RAW_ROUTE, get(fake_raw));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn config_for(hostname: String) -> Config {
        let mut config = Config::default();
        config.upstream.hostname = hostname;
        config.upstream.scheme = "http".to_string();
        config.upstream.project_key = "OPS".to_string();
        config.upstream.repo_slug = "lists".to_string();
        config.upstream.read_timeout_secs = 1;
        config
    }

    fn fetch(user: &str, password: &str, branch: &str, tenant: &str) -> FetchRequest {
        FetchRequest {
            credentials: Credentials::new(user, password),
            branch: branch.to_string(),
            file_path: WhitelistTarget::for_read(tenant, "Whitelist.csv").file_path,
        }
    }

    #[tokio::test]
    async fn fetch_returns_content_and_lines() {
        let addr = spawn_fake_upstream().await;
        let metrics = MetricsRegistry::new();
        let backend = BitbucketBackend::new(&config_for(addr.to_string()), metrics.clone()).unwrap();

        let raw = backend
            .fetch_raw(&fetch("alice", "s3cret", "jenkins-store-ort", "acme-corp"))
            .await
            .unwrap();

        assert!(raw.content.starts_with("# Whitelist for acme-corp in ort"));
        assert_eq!(
            raw.lines,
            vec!["# Whitelist for acme-corp in ort", "1.2.3.4,office,active"]
        );
        assert_eq!(raw.line_count(), 2);
        assert!(
            metrics
                .encode()
                .unwrap()
                .contains(r#"whitelist_upstream_reads_total{status="200"} 1"#)
        );
    }

    #[tokio::test]
    async fn reserved_characters_in_file_name_stay_in_the_path() {
        let addr = spawn_fake_upstream().await;
        let backend =
            BitbucketBackend::new(&config_for(addr.to_string()), MetricsRegistry::new()).unwrap();

        for (file, expected) in [("rules#1.csv", "rules-hash"), ("a?b.csv", "question-mark")] {
            let raw = backend
                .fetch_raw(&FetchRequest {
                    credentials: Credentials::new("alice", "s3cret"),
                    branch: "jenkins-store-ort".to_string(),
                    file_path: WhitelistTarget::for_read("acme-corp", file).file_path,
                })
                .await
                .unwrap_or_else(|e| panic!("{file}: {e:?}"));
            assert_eq!(raw.lines, vec![expected], "{file}");
        }
    }

    #[tokio::test]
    async fn missing_file_forwards_status() {
        let addr = spawn_fake_upstream().await;
        let backend =
            BitbucketBackend::new(&config_for(addr.to_string()), MetricsRegistry::new()).unwrap();

        let err = backend
            .fetch_raw(&fetch("alice", "s3cret", "jenkins-store-ort", "nobody"))
            .await
            .unwrap_err();

        match err {
            WhitelistError::NotFoundOrDenied {
                status,
                file_path,
                branch,
            } => {
                assert_eq!(status, 404);
                assert_eq!(file_path, "tenants/nobody/Whitelist.csv");
                assert_eq!(branch, "jenkins-store-ort");
            }
            other => panic!("expected NotFoundOrDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_credentials_forward_unauthorized() {
        let addr = spawn_fake_upstream().await;
        let backend =
            BitbucketBackend::new(&config_for(addr.to_string()), MetricsRegistry::new()).unwrap();

        let err = backend
            .fetch_raw(&fetch("alice", "wrong", "jenkins-store-ort", "acme-corp"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WhitelistError::NotFoundOrDenied { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn slow_upstream_is_timeout() {
        let addr = spawn_fake_upstream().await;
        let backend =
            BitbucketBackend::new(&config_for(addr.to_string()), MetricsRegistry::new()).unwrap();

        let err = backend
            .fetch_raw(&fetch("alice", "s3cret", "jenkins-store-ort", "slow"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WhitelistError::Upstream {
                timed_out: true,
                ..
            }
        ));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        // Nothing listens on a freshly released port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend =
            BitbucketBackend::new(&config_for(addr.to_string()), MetricsRegistry::new()).unwrap();
        let err = backend
            .fetch_raw(&fetch("alice", "s3cret", "jenkins-store-ort", "acme-corp"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn append_against_unreachable_host_is_redacted_clone_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let workspaces = tempfile::tempdir().unwrap();
        let mut config = config_for(addr.to_string());
        config.git.workspace_root = Some(workspaces.path().to_path_buf());
        let backend = BitbucketBackend::new(&config, MetricsRegistry::new()).unwrap();

        let err = backend
            .append_entry(&AppendRequest {
                credentials: Credentials::new("alice", "p@ss:word"),
                branch: "jenkins-store-ort".to_string(),
                target: WhitelistTarget::for_write("acme-corp", "Whitelist.csv"),
                entry: "1.2.3.4,office,active".to_string(),
                tenant: "acme-corp".to_string(),
                environment: "ort".to_string(),
            })
            .await
            .unwrap_err();

        match err {
            WhitelistError::Clone { branch, detail } => {
                assert_eq!(branch, "jenkins-store-ort");
                assert!(!detail.contains("p@ss:word"), "{detail}");
                assert!(!detail.contains("p%40ss%3Aword"), "{detail}");
            }
            other => panic!("expected Clone error, got {other:?}"),
        }
        assert!(std::fs::read_dir(workspaces.path()).unwrap().next().is_none());
    }
}
